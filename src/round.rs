//! One swiping round between two connected peers.
//!
//! Whoever loads the places sends them with `PLACES`; both sides then swipe
//! through the same list, mirror each swipe with `SWIPE` and finish with
//! `DONE` carrying their final likes. Matches are the places liked by both.

use thiserror::Error;

use crate::peer::types::{Place, SwipeMessage, SwipeValue};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RoundError {
    #[error("no places to swipe")]
    NoPlaces,

    #[error("round has not started")]
    NotStarted,

    #[error("all places already swiped")]
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Waiting,
    Swiping,
    Done,
}

#[derive(Debug, Default)]
pub struct SwipeRound {
    places: Vec<Place>,
    cursor: usize,
    my_likes: Vec<usize>,
    partner_likes: Vec<usize>,
    partner_done: bool,
}

impl SwipeRound {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> Phase {
        if self.places.is_empty() {
            Phase::Waiting
        } else if self.cursor >= self.places.len() {
            Phase::Done
        } else {
            Phase::Swiping
        }
    }

    pub fn places(&self) -> &[Place] {
        &self.places
    }

    /// Card currently on top, if any
    pub fn current(&self) -> Option<&Place> {
        self.places.get(self.cursor)
    }

    pub fn partner_done(&self) -> bool {
        self.partner_done
    }

    /// Loads the list locally and returns the message sharing it
    pub fn start(&mut self, places: Vec<Place>) -> Result<SwipeMessage, RoundError> {
        if places.is_empty() {
            return Err(RoundError::NoPlaces);
        }
        self.reset(places.clone());
        Ok(SwipeMessage::Places { places })
    }

    fn reset(&mut self, places: Vec<Place>) {
        self.places = places;
        self.cursor = 0;
        self.my_likes.clear();
    }

    /// Swipes the top card. Returns the `SWIPE` message, followed by `DONE`
    /// when it was the last card.
    pub fn swipe(&mut self, value: SwipeValue) -> Result<Vec<SwipeMessage>, RoundError> {
        match self.phase() {
            Phase::Waiting => return Err(RoundError::NotStarted),
            Phase::Done => return Err(RoundError::Finished),
            Phase::Swiping => {}
        }

        let index = self.cursor;
        if value == SwipeValue::Like {
            self.my_likes.push(index);
        }
        self.cursor += 1;

        let mut out = vec![SwipeMessage::Swipe { index, value }];
        if self.phase() == Phase::Done {
            out.push(SwipeMessage::Done {
                likes: self.my_likes.clone(),
            });
        }
        Ok(out)
    }

    /// Applies a message from the partner
    pub fn receive(&mut self, msg: SwipeMessage) {
        match msg {
            SwipeMessage::Places { places } => {
                if !places.is_empty() {
                    self.reset(places);
                }
            }
            SwipeMessage::Swipe { index, value } => {
                if value == SwipeValue::Like && !self.partner_likes.contains(&index) {
                    self.partner_likes.push(index);
                }
            }
            SwipeMessage::Done { likes } => {
                self.partner_likes = likes;
                self.partner_done = true;
            }
        }
    }

    /// Places liked by both sides, once both have finished
    pub fn matches(&self) -> Option<Vec<&Place>> {
        if self.phase() != Phase::Done || !self.partner_done {
            return None;
        }
        Some(
            self.my_likes
                .iter()
                .filter(|i| self.partner_likes.contains(i))
                .filter_map(|&i| self.places.get(i))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::types::GeoPoint;

    fn place(id: &str) -> Place {
        Place {
            id: id.into(),
            name: format!("Place {id}"),
            rating: 4.0,
            price_level: Some(2),
            address: "somewhere".into(),
            photo_url: None,
            location: GeoPoint { lat: 0.0, lng: 0.0 },
        }
    }

    #[test]
    fn test_full_round_produces_matches() {
        let mut me = SwipeRound::new();
        let mut partner = SwipeRound::new();

        let shared = me.start(vec![place("a"), place("b"), place("c")]).unwrap();
        partner.receive(shared);
        assert_eq!(partner.phase(), Phase::Swiping);

        let mut to_partner = Vec::new();
        for value in [SwipeValue::Like, SwipeValue::Nope, SwipeValue::Like] {
            to_partner.extend(me.swipe(value).unwrap());
        }
        assert!(matches!(to_partner.last(), Some(SwipeMessage::Done { likes }) if likes == &vec![0, 2]));

        let mut to_me = Vec::new();
        for value in [SwipeValue::Nope, SwipeValue::Like, SwipeValue::Like] {
            to_me.extend(partner.swipe(value).unwrap());
        }

        assert_eq!(me.matches(), None);
        to_me.into_iter().for_each(|m| me.receive(m));
        to_partner.into_iter().for_each(|m| partner.receive(m));

        let ids: Vec<_> = me.matches().unwrap().iter().map(|p| p.id.clone()).collect();
        assert_eq!(ids, vec!["c"]);
        assert_eq!(partner.matches().unwrap().len(), 1);
    }

    #[test]
    fn test_swipe_bounds() {
        let mut round = SwipeRound::new();
        assert_eq!(round.swipe(SwipeValue::Like), Err(RoundError::NotStarted));
        assert_eq!(round.start(Vec::new()), Err(RoundError::NoPlaces));

        round.start(vec![place("a")]).unwrap();
        let out = round.swipe(SwipeValue::Nope).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(round.swipe(SwipeValue::Like), Err(RoundError::Finished));
    }
}
