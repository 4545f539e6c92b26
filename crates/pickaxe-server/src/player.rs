//! Server-side physics state for one connected player (§3 "Player record").
//! Integration is a stub — gravity and a hard floor at y=0 — the spec
//! explicitly keeps physics out of scope for the core engine.

use std::time::Instant;

use pickaxe_protocol::transport::ConnId;
use pickaxe_types::{ClientId, Vec3d, Vec3f};

const GRAVITY: f64 = -20.0;

pub struct PlayerRecord {
    pub id: ClientId,
    pub conn: ConnId,
    pub position: Vec3d,
    pub velocity: Vec3f,
    pub yaw: f32,
    pub pitch: f32,
    pub on_ground: bool,
    pub last_heartbeat: Instant,
}

impl PlayerRecord {
    pub fn spawn(id: ClientId, conn: ConnId) -> Self {
        Self {
            id,
            conn,
            position: Vec3d::new(0.0, 60.0, 0.0),
            velocity: Vec3f::ZERO,
            yaw: 0.0,
            pitch: 0.0,
            on_ground: false,
            last_heartbeat: Instant::now(),
        }
    }

    /// Overwrites authoritative position/velocity from a client's
    /// `PlayerPosition` packet. Does not touch `last_heartbeat` — callers
    /// refresh that separately per §4.6.
    pub fn apply_position_update(&mut self, position: Vec3d, velocity: Vec3f) {
        self.position = position;
        self.velocity = velocity;
    }

    /// Gravity integration with a hard floor at world y=0.
    pub fn integrate(&mut self, dt: f64) {
        if !self.on_ground {
            self.velocity.y += (GRAVITY * dt) as f32;
        }
        self.position.x += self.velocity.x as f64 * dt;
        self.position.y += self.velocity.y as f64 * dt;
        self.position.z += self.velocity.z as f64 * dt;
        if self.position.y <= 0.0 {
            self.position.y = 0.0;
            self.velocity.y = 0.0;
            self.on_ground = true;
        } else {
            self.on_ground = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> ConnId {
        "127.0.0.1:9000".parse().unwrap()
    }

    #[test]
    fn falls_under_gravity_until_it_hits_the_floor() {
        let mut player = PlayerRecord::spawn(1, addr());
        player.position = Vec3d::new(0.0, 1.0, 0.0);
        for _ in 0..100 {
            player.integrate(0.1);
        }
        assert_eq!(player.position.y, 0.0);
        assert!(player.on_ground);
        assert_eq!(player.velocity.y, 0.0);
    }

    #[test]
    fn authoritative_position_update_overwrites_state() {
        let mut player = PlayerRecord::spawn(1, addr());
        player.apply_position_update(Vec3d::new(5.0, 10.0, -3.0), Vec3f::new(1.0, 0.0, 0.0));
        assert_eq!(player.position, Vec3d::new(5.0, 10.0, -3.0));
        assert_eq!(player.velocity, Vec3f::new(1.0, 0.0, 0.0));
    }
}
