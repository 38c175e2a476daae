//! Binary snapshot frames streamed to clients every tick
//!
//! Layout (big-endian, 24 bytes):
//! `ball.x f32 | ball.y f32 | paddle1.y f32 | paddle2.y f32 | score1 u32 | score2 u32`

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::state::{MatchState, Score};

/// Size of an encoded snapshot in bytes
pub const SNAPSHOT_LEN: usize = 24;

/// Decoded view of a snapshot frame. Ball direction is not on the wire.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SnapshotFrame {
    pub ball_x: f32,
    pub ball_y: f32,
    pub paddle1_y: f32,
    pub paddle2_y: f32,
    pub score: Score,
}

impl From<&MatchState> for SnapshotFrame {
    fn from(state: &MatchState) -> Self {
        Self {
            ball_x: state.ball.position.x,
            ball_y: state.ball.position.y,
            paddle1_y: state.paddle1.y,
            paddle2_y: state.paddle2.y,
            score: state.score,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("snapshot must be {SNAPSHOT_LEN} bytes, got {0}")]
    BadLength(usize),
}

/// Encode a match state into a wire frame
pub fn encode(state: &MatchState) -> Bytes {
    SnapshotFrame::from(state).encode()
}

impl SnapshotFrame {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(SNAPSHOT_LEN);
        buf.put_f32(self.ball_x);
        buf.put_f32(self.ball_y);
        buf.put_f32(self.paddle1_y);
        buf.put_f32(self.paddle2_y);
        buf.put_u32(self.score.player1);
        buf.put_u32(self.score.player2);
        buf.freeze()
    }

    pub fn decode(mut data: &[u8]) -> Result<Self, SnapshotError> {
        if data.len() != SNAPSHOT_LEN {
            return Err(SnapshotError::BadLength(data.len()));
        }
        Ok(Self {
            ball_x: data.get_f32(),
            ball_y: data.get_f32(),
            paddle1_y: data.get_f32(),
            paddle2_y: data.get_f32(),
            score: Score {
                player1: data.get_u32(),
                player2: data.get_u32(),
            },
        })
    }
}

/// Running counters for outbound snapshot traffic of one session
#[derive(Debug, Default, Clone, Copy)]
pub struct SnapshotStats {
    pub sent: u64,
    pub dropped: u64,
}

impl SnapshotStats {
    pub fn record(&mut self, delivered: bool) {
        if delivered {
            self.sent += 1;
        } else {
            self.dropped += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::{BallState, PaddleState, Vector2};

    #[test]
    fn frame_layout_is_big_endian() {
        let state = MatchState {
            ball: BallState {
                position: Vector2::new(1.0, 2.5),
                direction: Vector2::new(1.0, -1.0),
            },
            paddle1: PaddleState { y: 0.0, ..Default::default() },
            paddle2: PaddleState { y: 525.0, ..Default::default() },
            score: Score { player1: 3, player2: 258 },
        };
        let bytes = encode(&state);

        assert_eq!(bytes.len(), SNAPSHOT_LEN);
        assert_eq!(&bytes[0..4], &1.0f32.to_be_bytes());
        assert_eq!(&bytes[4..8], &2.5f32.to_be_bytes());
        assert_eq!(&bytes[12..16], &525.0f32.to_be_bytes());
        assert_eq!(&bytes[16..20], &[0, 0, 0, 3]);
        assert_eq!(&bytes[20..24], &[0, 0, 1, 2]);
    }

    #[test]
    fn decode_restores_exact_values() {
        let frame = SnapshotFrame {
            ball_x: 487.123_46,
            ball_y: -0.000_1,
            paddle1_y: 262.5,
            paddle2_y: f32::MIN_POSITIVE,
            score: Score { player1: 11, player2: u32::MAX },
        };
        let decoded = SnapshotFrame::decode(&frame.encode()).unwrap();
        assert_eq!(decoded.ball_x.to_bits(), frame.ball_x.to_bits());
        assert_eq!(decoded.ball_y.to_bits(), frame.ball_y.to_bits());
        assert_eq!(decoded.paddle2_y.to_bits(), frame.paddle2_y.to_bits());
        assert_eq!(decoded, frame);
    }

    #[test]
    fn decode_rejects_wrong_length() {
        assert_eq!(SnapshotFrame::decode(&[0u8; 23]), Err(SnapshotError::BadLength(23)));
        assert_eq!(SnapshotFrame::decode(&[0u8; 25]), Err(SnapshotError::BadLength(25)));
    }
}
