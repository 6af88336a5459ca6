//! Message dispatcher: one handler per client message type.

use std::sync::Arc;

use duel_core::messages::{
    AttackRequest, ChangePokemonRequest, DisconnectNotice, QueueJoinedResponse, StatusResponse,
    SurrenderRequest,
};
use duel_core::validation::{self, FieldErrors};
use duel_core::{ClientMessageType, Envelope, ErrorResponse, PlayerId, ServerMessageType};
use duel_engine::{BattleService, BattleSnapshot, EngineError, MatchmakingQueue};
use duel_store::Storage;

use crate::server::ServerConfig;
use crate::session::{DeliveryError, Session, SessionRegistry};

/// Shared state available to all handlers.
pub struct HandlerState {
    pub registry: Arc<SessionRegistry>,
    pub queue: Arc<MatchmakingQueue>,
    pub battles: BattleService,
    pub config: ServerConfig,
}

impl HandlerState {
    pub fn new(storage: Arc<dyn Storage>, config: ServerConfig) -> Self {
        let queue = Arc::new(MatchmakingQueue::new());
        let registry = Arc::new(SessionRegistry::new(Arc::clone(&queue), config.send_timeout));
        Self {
            registry,
            queue,
            battles: BattleService::with_damage(storage, config.base_damage),
            config,
        }
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        self.battles.storage()
    }
}

/// Why a request was rejected.
#[derive(Debug)]
pub enum HandlerError {
    Invalid(FieldErrors),
    Engine(EngineError),
}

impl From<FieldErrors> for HandlerError {
    fn from(errors: FieldErrors) -> Self {
        Self::Invalid(errors)
    }
}

impl From<EngineError> for HandlerError {
    fn from(err: EngineError) -> Self {
        Self::Engine(err)
    }
}

impl HandlerError {
    pub fn to_response(&self) -> ErrorResponse {
        match self {
            Self::Invalid(fields) => ErrorResponse::invalid_fields(fields.clone()),
            Self::Engine(e) if e.is_domain() => ErrorResponse::bad_request(e.to_string()),
            Self::Engine(e) => ErrorResponse::database(e.to_string()),
        }
    }
}

/// Route one decoded frame from `session`. Errors are reported to the sender
/// as `Error` frames; the connection always stays open.
pub async fn dispatch(state: &HandlerState, session: &Session, envelope: Envelope) {
    let kind = match envelope.client_type() {
        Ok(kind) => kind,
        Err(unknown) => {
            tracing::warn!(player_id = %session.player_id, message_type = unknown.0, "unknown message type");
            reply(state, session, error_frame(ErrorResponse::unknown_type(unknown.0))).await;
            return;
        }
    };

    tracing::debug!(player_id = %session.player_id, message_type = ?kind, "message received");

    let result = match kind {
        ClientMessageType::Connect => {
            reply(state, session, error_frame(ErrorResponse::already_connected())).await;
            Ok(())
        }
        ClientMessageType::Status => status(state, session).await,
        ClientMessageType::Match => match_player(state, session).await,
        ClientMessageType::Attack => attack(state, session, &envelope).await,
        ClientMessageType::ChangePokemon => change_pokemon(state, session, &envelope).await,
        ClientMessageType::Surrender => surrender(state, session, &envelope).await,
    };

    if let Err(err) = result {
        match &err {
            HandlerError::Engine(e) if !e.is_domain() => {
                tracing::error!(player_id = %session.player_id, message_type = ?kind, error = %e, "request failed");
            }
            HandlerError::Engine(e) => {
                tracing::info!(player_id = %session.player_id, message_type = ?kind, kind = e.error_kind(), "request rejected");
            }
            HandlerError::Invalid(fields) => {
                tracing::info!(player_id = %session.player_id, message_type = ?kind, fields = ?fields, "invalid request");
            }
        }
        reply(state, session, error_frame(err.to_response())).await;
    }
}

fn error_frame(err: ErrorResponse) -> Envelope {
    Envelope::server(ServerMessageType::Error, err)
}

/// Enqueue on the caller's own session.
async fn reply(state: &HandlerState, session: &Session, envelope: Envelope) {
    if let Err(e) = session.enqueue(envelope, state.registry.send_timeout()).await {
        tracing::warn!(player_id = %session.player_id, error = %e, "failed to enqueue reply");
    }
}

/// Deliver to someone else. Failures are logged; callers may ignore them.
async fn notify(state: &HandlerState, player_id: &PlayerId, envelope: Envelope) -> Result<(), DeliveryError> {
    let result = state.registry.send(player_id, envelope).await;
    if let Err(e) = &result {
        tracing::warn!(player_id = %player_id, error = %e, "failed to notify player");
    }
    result
}

async fn status(state: &HandlerState, session: &Session) -> Result<(), HandlerError> {
    let payload = StatusResponse {
        status: "connected".to_string(),
        username: session.username.clone(),
        player_id: session.player_id,
    };
    reply(state, session, Envelope::server(ServerMessageType::Status, payload)).await;
    Ok(())
}

async fn match_player(state: &HandlerState, session: &Session) -> Result<(), HandlerError> {
    // The battle check runs under the queue lock so a player whose battle is
    // being created can never slip back into the queue.
    let entered = state.queue.enter_guarded(session.player_id, &session.username, || {
        match state.battles.battle_for_player(&session.player_id)? {
            Some(battle) => Err(EngineError::AlreadyInBattle(battle.id)),
            None => Ok(()),
        }
    })?;

    let Some(opponent) = entered else {
        let payload = QueueJoinedResponse {
            message: "Joined matchmaking queue, waiting for opponent...".to_string(),
            queue_size: state.queue.size(),
        };
        reply(state, session, Envelope::server(ServerMessageType::QueueJoined, payload)).await;
        return Ok(());
    };

    // The longest waiter takes the first seat.
    let created = state.battles.create_battle(&opponent.player_id, &session.player_id);
    state.queue.finish_pairing(&opponent.player_id, &session.player_id);
    let snapshot = match created {
        Ok(snapshot) => snapshot,
        Err(e) => {
            tracing::error!(
                player1 = %opponent.player_id,
                player2 = %session.player_id,
                error = %e,
                "failed to create battle"
            );
            let frame = error_frame(HandlerError::Engine(e).to_response());
            let _ = notify(state, &opponent.player_id, frame.clone()).await;
            reply(state, session, frame).await;
            return Ok(());
        }
    };

    let delivery = match snapshot.match_found_for(&opponent.player_id) {
        Some(view) => {
            notify(
                state,
                &opponent.player_id,
                Envelope::server(ServerMessageType::MatchFound, view),
            )
            .await
        }
        None => Err(DeliveryError::NotConnected(opponent.player_id)),
    };

    if let Err(DeliveryError::NotConnected(_) | DeliveryError::Closed(_)) = delivery {
        // The opponent left between pairing and battle creation.
        if let Err(e) = state.battles.delete_battle(&snapshot.battle_id) {
            tracing::warn!(battle_id = %snapshot.battle_id, error = %e, "failed to drop orphaned battle");
        }
        let notice = DisconnectNotice {
            battle_id: snapshot.battle_id,
            player_id: opponent.player_id,
            message: format!("{} disconnected", opponent.username),
        };
        reply(state, session, Envelope::server(ServerMessageType::Disconnect, notice)).await;
        return Ok(());
    }

    if let Some(view) = snapshot.match_found_for(&session.player_id) {
        reply(state, session, Envelope::server(ServerMessageType::MatchFound, view)).await;
    }
    Ok(())
}

async fn attack(state: &HandlerState, session: &Session, envelope: &Envelope) -> Result<(), HandlerError> {
    let request: AttackRequest = validation::validate_payload(&envelope.payload)?;
    let battle_id = validation::parse_battle_id(&request.battle_id)?;
    let opponent = state.battles.opponent_of(&battle_id, &session.player_id)?;

    let snapshot = state
        .battles
        .attack(&battle_id, &session.player_id, &opponent, request.move_id)?;
    broadcast(state, session, &opponent, ServerMessageType::Attack, &snapshot).await;

    if snapshot.ended {
        broadcast(state, session, &opponent, ServerMessageType::BattleEnded, &snapshot).await;
        finish(state, &snapshot);
    }
    Ok(())
}

async fn change_pokemon(state: &HandlerState, session: &Session, envelope: &Envelope) -> Result<(), HandlerError> {
    let request: ChangePokemonRequest = validation::validate_payload(&envelope.payload)?;
    let battle_id = validation::parse_battle_id(&request.battle_id)?;
    let opponent = state.battles.opponent_of(&battle_id, &session.player_id)?;

    let snapshot = state
        .battles
        .switch(&battle_id, &session.player_id, &opponent, request.position)?;
    broadcast(state, session, &opponent, ServerMessageType::ChangePokemon, &snapshot).await;

    if snapshot.ended {
        broadcast(state, session, &opponent, ServerMessageType::BattleEnded, &snapshot).await;
        finish(state, &snapshot);
    }
    Ok(())
}

async fn surrender(state: &HandlerState, session: &Session, envelope: &Envelope) -> Result<(), HandlerError> {
    let request: SurrenderRequest = validation::validate_payload(&envelope.payload)?;
    let battle_id = validation::parse_battle_id(&request.battle_id)?;

    let snapshot = state.battles.surrender(&battle_id, &session.player_id)?;
    let opponent = snapshot
        .opponent_of(&session.player_id)
        .ok_or(EngineError::NotParticipant {
            battle: battle_id,
            player: session.player_id,
        })?;
    broadcast(state, session, &opponent, ServerMessageType::BattleEnded, &snapshot).await;
    finish(state, &snapshot);
    Ok(())
}

/// Send each participant their own view: the caller through its queue, the
/// opponent through the registry.
async fn broadcast(
    state: &HandlerState,
    session: &Session,
    opponent: &PlayerId,
    kind: ServerMessageType,
    snapshot: &BattleSnapshot,
) {
    if let Some(view) = snapshot.state_for(&session.player_id) {
        reply(state, session, Envelope::server(kind, view)).await;
    }
    if let Some(view) = snapshot.state_for(opponent) {
        let _ = notify(state, opponent, Envelope::server(kind, view)).await;
    }
}

fn finish(state: &HandlerState, snapshot: &BattleSnapshot) {
    match state.battles.delete_battle(&snapshot.battle_id) {
        Ok(()) => tracing::info!(battle_id = %snapshot.battle_id, winner = ?snapshot.winner, "battle finished"),
        Err(e) => tracing::error!(battle_id = %snapshot.battle_id, error = %e, "failed to delete finished battle"),
    }
}

/// Clean up after a departed player: forfeit any battle (telling the opponent)
/// and delete the user's records.
pub async fn on_disconnect(state: &HandlerState, player_id: &PlayerId, username: &str) {
    match state.battles.forfeit(player_id) {
        Ok(Some(battle)) => {
            if let Some(opponent) = battle.opponent_of(player_id) {
                let notice = DisconnectNotice {
                    battle_id: battle.id,
                    player_id: *player_id,
                    message: format!("{username} disconnected"),
                };
                let _ = notify(state, &opponent, Envelope::server(ServerMessageType::Disconnect, notice)).await;
            }
        }
        Ok(None) => {}
        Err(e) => tracing::error!(player_id = %player_id, error = %e, "failed to forfeit battle"),
    }

    if let Err(e) = state.storage().delete_user(player_id) {
        tracing::error!(player_id = %player_id, error = %e, "failed to delete user");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duel_core::messages::BattleStateResponse;
    use duel_store::SqliteStorage;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    struct Player {
        session: Arc<Session>,
        rx: mpsc::Receiver<Envelope>,
    }

    fn state() -> HandlerState {
        HandlerState::new(Arc::new(SqliteStorage::in_memory().unwrap()), ServerConfig::default())
    }

    fn join(state: &HandlerState, name: &str) -> Player {
        let id = PlayerId::new();
        state
            .storage()
            .create_user_with_roster(&id, name, &[1, 4, 7])
            .unwrap();
        let (tx, rx) = mpsc::channel(16);
        let session = Arc::new(Session::new(id, name, tx, CancellationToken::new()));
        state.registry.add(Arc::clone(&session)).unwrap();
        Player { session, rx }
    }

    async fn send(state: &HandlerState, player: &Player, kind: ClientMessageType, payload: serde_json::Value) {
        dispatch(state, &player.session, Envelope::client(kind, payload)).await;
    }

    fn next(player: &mut Player) -> Envelope {
        player.rx.try_recv().unwrap()
    }

    async fn matched_pair(state: &HandlerState) -> (Player, Player, String) {
        let mut a = join(state, "red");
        let mut b = join(state, "blue");
        send(state, &a, ClientMessageType::Match, serde_json::Value::Null).await;
        assert!(next(&mut a).is(ServerMessageType::QueueJoined));
        send(state, &b, ClientMessageType::Match, serde_json::Value::Null).await;
        let found = next(&mut b);
        assert!(found.is(ServerMessageType::MatchFound));
        assert!(next(&mut a).is(ServerMessageType::MatchFound));
        let battle_id = found.payload["battle_id"].as_str().unwrap().to_string();
        (a, b, battle_id)
    }

    #[tokio::test]
    async fn unknown_type_reports_received_code() {
        let state = state();
        let mut p = join(&state, "red");
        dispatch(
            &state,
            &p.session,
            Envelope {
                message_type: 99,
                payload: serde_json::Value::Null,
            },
        )
        .await;
        let err: ErrorResponse = next(&mut p).decode().unwrap();
        assert_eq!(err.msg, "Unknown message type");
        assert_eq!(err.details["received_type"], "99");
    }

    #[tokio::test]
    async fn second_connect_is_rejected() {
        let state = state();
        let mut p = join(&state, "red");
        send(&state, &p, ClientMessageType::Connect, serde_json::json!({"username": "x"})).await;
        let err: ErrorResponse = next(&mut p).decode().unwrap();
        assert_eq!(err.msg, "Already connected");
    }

    #[tokio::test]
    async fn status_echoes_identity() {
        let state = state();
        let mut p = join(&state, "red");
        send(&state, &p, ClientMessageType::Status, serde_json::Value::Null).await;
        let frame = next(&mut p);
        assert!(frame.is(ServerMessageType::Status));
        assert_eq!(frame.payload["status"], "connected");
        assert_eq!(frame.payload["username"], "red");
        assert_eq!(frame.payload["player_id"], p.session.player_id.to_string());
    }

    #[tokio::test]
    async fn match_pairs_oldest_waiter_as_player_one() {
        let state = state();
        let (a, b, battle_id) = matched_pair(&state).await;
        let battle = state
            .battles
            .battle_for_player(&b.session.player_id)
            .unwrap()
            .unwrap();
        assert_eq!(battle.id.to_string(), battle_id);
        assert_eq!(battle.player1_id, a.session.player_id);
    }

    #[tokio::test]
    async fn match_while_fighting_is_rejected() {
        let state = state();
        let (mut a, _b, _) = matched_pair(&state).await;
        send(&state, &a, ClientMessageType::Match, serde_json::Value::Null).await;
        let err: ErrorResponse = next(&mut a).decode().unwrap();
        assert_eq!(err.msg, "Bad request");
        assert!(err.details["error"].contains("already in battle"));
        assert_eq!(state.queue.size(), 0);
    }

    #[tokio::test]
    async fn match_while_being_paired_is_rejected() {
        let state = state();
        let mut a = join(&state, "red");
        let b = join(&state, "blue");
        let (a_id, b_id) = (a.session.player_id, b.session.player_id);
        send(&state, &a, ClientMessageType::Match, serde_json::Value::Null).await;
        assert!(next(&mut a).is(ServerMessageType::QueueJoined));

        // Blue has popped red and has not created the battle yet.
        let popped = state.queue.enter(b_id, "blue").unwrap().unwrap();
        assert_eq!(popped.player_id, a_id);

        send(&state, &a, ClientMessageType::Match, serde_json::Value::Null).await;
        let err: ErrorResponse = next(&mut a).decode().unwrap();
        assert!(err.details["error"].contains("already being set up"));
        assert_eq!(state.queue.size(), 0);

        state.battles.create_battle(&a_id, &b_id).unwrap();
        state.queue.finish_pairing(&a_id, &b_id);

        send(&state, &a, ClientMessageType::Match, serde_json::Value::Null).await;
        let err: ErrorResponse = next(&mut a).decode().unwrap();
        assert!(err.details["error"].contains("already in battle"));
        assert!(!state.queue.contains(&a_id));
    }

    #[tokio::test]
    async fn attack_sends_each_side_its_own_view() {
        let state = state();
        let (mut a, mut b, battle_id) = matched_pair(&state).await;

        send(
            &state,
            &a,
            ClientMessageType::Attack,
            serde_json::json!({"battle_id": battle_id, "move_id": 1}),
        )
        .await;

        let mine: BattleStateResponse = next(&mut a).decode().unwrap();
        let theirs: BattleStateResponse = next(&mut b).decode().unwrap();
        assert_eq!(mine.your_info.player_id, a.session.player_id);
        assert_eq!(theirs.your_info.player_id, b.session.player_id);
        assert_eq!(theirs.your_info.team[0].current_hp, 35);
        assert_eq!(mine.opponent_info.team[0].current_hp, 35);
        assert!(!mine.battle_ended);
    }

    #[tokio::test]
    async fn out_of_turn_attack_is_bad_request() {
        let state = state();
        let (_a, mut b, battle_id) = matched_pair(&state).await;
        send(
            &state,
            &b,
            ClientMessageType::Attack,
            serde_json::json!({"battle_id": battle_id, "move_id": 1}),
        )
        .await;
        let err: ErrorResponse = next(&mut b).decode().unwrap();
        assert_eq!(err.code, 400);
        assert!(err.details["error"].contains("not your turn"));
    }

    #[tokio::test]
    async fn invalid_fields_are_listed() {
        let state = state();
        let mut p = join(&state, "red");
        send(
            &state,
            &p,
            ClientMessageType::ChangePokemon,
            serde_json::json!({"battle_id": "nope", "position": 0}),
        )
        .await;
        let err: ErrorResponse = next(&mut p).decode().unwrap();
        assert_eq!(err.msg, "Request contains invalid fields.");
        assert!(err.details.contains_key("position"));

        send(
            &state,
            &p,
            ClientMessageType::Surrender,
            serde_json::json!({"battle_id": "nope"}),
        )
        .await;
        let err: ErrorResponse = next(&mut p).decode().unwrap();
        assert_eq!(err.details["battle_id"], "must be a valid UUID");
    }

    #[tokio::test]
    async fn surrender_ends_battle_for_both() {
        let state = state();
        let (mut a, mut b, battle_id) = matched_pair(&state).await;

        send(
            &state,
            &b,
            ClientMessageType::Surrender,
            serde_json::json!({"battle_id": battle_id}),
        )
        .await;

        let winner = a.session.player_id;
        for player in [&mut a, &mut b] {
            let frame = next(player);
            assert!(frame.is(ServerMessageType::BattleEnded));
            let view: BattleStateResponse = frame.decode().unwrap();
            assert!(view.battle_ended);
            assert_eq!(view.winner, Some(winner));
            assert_eq!(view.message, "blue surrendered");
        }
        assert!(state.battles.battle_for_player(&winner).unwrap().is_none());
    }

    #[tokio::test]
    async fn disconnect_notifies_opponent_and_deletes_user() {
        let state = state();
        let (mut a, b, battle_id) = matched_pair(&state).await;
        let gone = b.session.player_id;

        state.registry.remove(&gone);
        on_disconnect(&state, &gone, "blue").await;

        let frame = next(&mut a);
        assert!(frame.is(ServerMessageType::Disconnect));
        assert_eq!(frame.payload["battle_id"], battle_id);
        assert_eq!(frame.payload["player_id"], gone.to_string());
        assert!(state.storage().get_user(&gone).unwrap_err().is_not_found());
        assert!(state.battles.battle_for_player(&a.session.player_id).unwrap().is_none());
    }
}
