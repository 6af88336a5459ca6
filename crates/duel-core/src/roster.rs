use serde::{Deserialize, Serialize};

/// One unit in a player's team.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterSlot {
    pub position: i64,
    pub species_id: i64,
    pub current_hp: i64,
    pub max_hp: i64,
    pub fainted: bool,
}

impl RosterSlot {
    /// Eligible to become the active unit.
    pub fn is_available(&self) -> bool {
        self.current_hp > 0 && !self.fainted
    }
}

/// Which seat of a battle a player occupies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Player1,
    Player2,
}

impl Side {
    /// Odd turns belong to player1, even turns to player2.
    pub fn for_turn(turn: i64) -> Self {
        if turn % 2 == 1 {
            Self::Player1
        } else {
            Self::Player2
        }
    }

    pub fn other(self) -> Self {
        match self {
            Self::Player1 => Self::Player2,
            Self::Player2 => Self::Player1,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Player1 => write!(f, "player1"),
            Self::Player2 => write!(f, "player2"),
        }
    }
}

/// True when every slot has fainted. An empty roster counts as wiped.
pub fn all_fainted(roster: &[RosterSlot]) -> bool {
    roster.iter().all(|slot| slot.fainted)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(position: i64, hp: i64) -> RosterSlot {
        RosterSlot {
            position,
            species_id: 1,
            current_hp: hp,
            max_hp: 45,
            fainted: hp == 0,
        }
    }

    #[test]
    fn turn_parity() {
        assert_eq!(Side::for_turn(1), Side::Player1);
        assert_eq!(Side::for_turn(2), Side::Player2);
        assert_eq!(Side::for_turn(7), Side::Player1);
        assert_eq!(Side::Player1.other(), Side::Player2);
    }

    #[test]
    fn availability() {
        assert!(slot(1, 10).is_available());
        assert!(!slot(1, 0).is_available());
    }

    #[test]
    fn wiped_roster() {
        assert!(all_fainted(&[slot(1, 0), slot(2, 0)]));
        assert!(!all_fainted(&[slot(1, 0), slot(2, 3)]));
    }
}
