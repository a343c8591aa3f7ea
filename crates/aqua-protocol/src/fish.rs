/// Fish — the mobile objects tanks pass around the ring.
///
/// Motion is deliberately minimal: a fish moves a fixed step per tick
/// along its direction and reaches the boundary when it leaves
/// `0..=width`.
use serde::{Deserialize, Serialize};

use crate::types::{Direction, PeerId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fish {
    /// `fish<N>@<home tank id>`.
    pub id: String,
    pub direction: Direction,
    pub x: i32,
    pub y: i32,
    /// Flipped by a successful location request.
    pub toggled: bool,
}

impl Fish {
    pub fn new(id: impl Into<String>, x: i32, y: i32, direction: Direction) -> Self {
        Self {
            id: id.into(),
            direction,
            x,
            y,
            toggled: false,
        }
    }

    /// Fish id for the `counter`-th fish born in `home`.
    pub fn id_for(counter: u32, home: &PeerId) -> String {
        format!("fish{counter}@{home}")
    }

    /// The tank this fish was born in.
    pub fn home_tank(&self) -> Option<PeerId> {
        home_tank_of(&self.id)
    }

    /// Move one step along the current direction.
    pub fn advance(&mut self, step: i32) {
        match self.direction {
            Direction::Left => self.x -= step,
            Direction::Right => self.x += step,
        }
    }

    pub fn hits_edge(&self, width: i32) -> bool {
        self.x < 0 || self.x > width
    }

    pub fn reverse(&mut self) {
        self.direction = self.direction.reverse();
    }

    /// Place the fish at the edge it enters a new tank through.
    pub fn set_to_start(&mut self, width: i32) {
        self.x = match self.direction {
            Direction::Left => width,
            Direction::Right => 0,
        };
    }

    pub fn toggle(&mut self) {
        self.toggled = !self.toggled;
    }
}

/// Extract the home tank from a fish id (`fish3@client1` → `client1`).
pub fn home_tank_of(fish_id: &str) -> Option<PeerId> {
    match fish_id.split_once('@') {
        Some((_, home)) if !home.is_empty() => Some(PeerId::new(home)),
        _ => None,
    }
}
