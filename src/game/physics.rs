//! Ball and paddle physics for a single match

use std::time::Duration;

use rand::Rng;

use super::state::{BallState, Intent, MatchState, PaddleState, Side, Vector2};

/// Board geometry and speed constants, fixed for the lifetime of a session
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhysicsConfig {
    /// Board width in pixels
    pub board_width: f32,
    /// Board height in pixels
    pub board_height: f32,
    pub paddle_width: f32,
    pub paddle_height: f32,
    /// Gap between a board edge and the outer face of its paddle
    pub paddle_margin: f32,
    /// Ball is a square of this side
    pub ball_size: f32,
    /// Paddle travel in pixels per second
    pub paddle_speed: f32,
    /// Ball travel per axis in pixels per second
    pub ball_speed: f32,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        // 15px grid on a 1000x600 canvas, paddles five cells tall
        Self {
            board_width: 1000.0,
            board_height: 600.0,
            paddle_width: 15.0,
            paddle_height: 75.0,
            paddle_margin: 30.0,
            ball_size: 15.0,
            paddle_speed: 360.0,
            ball_speed: 300.0,
        }
    }
}

impl PhysicsConfig {
    pub fn max_paddle_y(&self) -> f32 {
        (self.board_height - self.paddle_height).max(0.0)
    }

    pub fn paddle_x(&self, side: Side) -> f32 {
        match side {
            Side::Player1 => self.paddle_margin,
            Side::Player2 => self.board_width - self.paddle_margin - self.paddle_width,
        }
    }

    pub fn center(&self) -> Vector2 {
        Vector2::new(self.board_width / 2.0, self.board_height / 2.0)
    }
}

/// Axis-aligned box used for overlap tests
#[derive(Debug, Clone, Copy)]
struct Rect {
    x: f32,
    y: f32,
    w: f32,
    h: f32,
}

impl Rect {
    fn overlaps(&self, other: &Rect) -> bool {
        self.x < other.x + other.w
            && self.x + self.w > other.x
            && self.y < other.y + other.h
            && self.y + self.h > other.y
    }
}

/// Deterministic Pong simulation. Holds no mutable state of its own.
#[derive(Debug, Clone)]
pub struct PhysicsEngine {
    config: PhysicsConfig,
}

impl PhysicsEngine {
    pub fn new(config: PhysicsConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PhysicsConfig {
        &self.config
    }

    /// Paddles centred, ball parked at the centre and not yet served
    pub fn initial_state(&self) -> MatchState {
        let paddle = PaddleState {
            y: self.config.max_paddle_y() / 2.0,
            intent: Intent::Idle,
        };
        MatchState {
            ball: BallState {
                position: self.config.center(),
                direction: Vector2::ZERO,
            },
            paddle1: paddle,
            paddle2: paddle,
            ..Default::default()
        }
    }

    /// Put the ball back in the centre heading along a random diagonal
    pub fn serve<R: Rng>(&self, ball: &mut BallState, rng: &mut R) {
        let dx = if rng.gen_bool(0.5) { 1.0 } else { -1.0 };
        let dy = if rng.gen_bool(0.5) { 1.0 } else { -1.0 };
        ball.position = self.config.center();
        ball.direction = Vector2::new(dx, dy);
    }

    /// Advance the whole match by `dt` seconds.
    /// The RNG is only consumed when a point is scored and the ball is re-served.
    pub fn advance<R: Rng>(
        &self,
        state: &MatchState,
        intent1: Intent,
        intent2: Intent,
        dt: f32,
        rng: &mut R,
    ) -> MatchState {
        let mut next = self.advance_paddles(state, intent1, intent2, dt);
        if !next.ball.is_served() {
            return next;
        }

        let speed = self.config.ball_speed * dt;
        next.ball.position.x += next.ball.direction.x * speed;
        next.ball.position.y += next.ball.direction.y * speed;

        self.bounce_walls(&mut next.ball);
        self.bounce_paddles(&mut next);

        let scorer = if next.ball.position.x < 0.0 {
            Some(Side::Player2)
        } else if next.ball.position.x > self.config.board_width {
            Some(Side::Player1)
        } else {
            None
        };

        if let Some(side) = scorer {
            next.score.credit(side);
            self.serve(&mut next.ball, rng);
        }

        debug_assert!(next.ball.position.is_finite(), "ball left the reals");
        next
    }

    /// Move only the paddles; the ball stays where it is
    pub fn advance_paddles(
        &self,
        state: &MatchState,
        intent1: Intent,
        intent2: Intent,
        dt: f32,
    ) -> MatchState {
        let mut next = *state;
        next.paddle1 = self.move_paddle(state.paddle1, intent1, dt);
        next.paddle2 = self.move_paddle(state.paddle2, intent2, dt);
        next
    }

    fn move_paddle(&self, paddle: PaddleState, intent: Intent, dt: f32) -> PaddleState {
        let y = paddle.y + intent.sign() * self.config.paddle_speed * dt;
        PaddleState {
            y: y.clamp(0.0, self.config.max_paddle_y()),
            intent,
        }
    }

    fn bounce_walls(&self, ball: &mut BallState) {
        let floor = self.config.board_height - self.config.ball_size;
        if ball.position.y <= 0.0 {
            ball.position.y = 0.0;
            ball.direction.y = ball.direction.y.abs();
        } else if ball.position.y >= floor {
            ball.position.y = floor;
            ball.direction.y = -ball.direction.y.abs();
        }
    }

    fn bounce_paddles(&self, state: &mut MatchState) {
        let ball = Rect {
            x: state.ball.position.x,
            y: state.ball.position.y,
            w: self.config.ball_size,
            h: self.config.ball_size,
        };
        let left = self.paddle_rect(Side::Player1, state.paddle1.y);
        let right = self.paddle_rect(Side::Player2, state.paddle2.y);

        // Snap flush against the face so the same paddle can't hit again next tick
        if ball.overlaps(&left) {
            state.ball.direction.x = state.ball.direction.x.abs();
            state.ball.position.x = left.x + left.w;
        } else if ball.overlaps(&right) {
            state.ball.direction.x = -state.ball.direction.x.abs();
            state.ball.position.x = right.x - self.config.ball_size;
        }
    }

    fn paddle_rect(&self, side: Side, y: f32) -> Rect {
        Rect {
            x: self.config.paddle_x(side),
            y,
            w: self.config.paddle_width,
            h: self.config.paddle_height,
        }
    }
}

/// Accumulator turning irregular wall-clock ticks into whole fixed steps
#[derive(Debug, Clone)]
pub struct FixedStep {
    step: Duration,
    accumulator: Duration,
    max_steps: u32,
}

impl FixedStep {
    pub fn new(step: Duration, max_steps: u32) -> Self {
        Self {
            step,
            accumulator: Duration::ZERO,
            max_steps: max_steps.max(1),
        }
    }

    /// Feed elapsed time, get the number of steps to simulate.
    /// A backlog larger than `max_steps` is discarded rather than replayed.
    pub fn advance(&mut self, elapsed: Duration) -> u32 {
        if self.step.is_zero() {
            return 0;
        }
        self.accumulator += elapsed;
        let due = (self.accumulator.as_nanos() / self.step.as_nanos()) as u32;
        if due > self.max_steps {
            self.accumulator = Duration::ZERO;
            return self.max_steps;
        }
        self.accumulator -= self.step * due;
        due
    }
}
