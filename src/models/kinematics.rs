//! # 運動モデル
//!
//! 全ての運動体の位置を時刻の閉形式関数として与えます。
//!
//! - ミサイル: 照準点へ向かう等速直線運動
//! - 無人機: 等速直線運動（速さと方位角から速度ベクトルを生成）
//! - 煙幕弾: 投下時の無人機速度を初速とする重力下の放物運動
//! - 煙幕雲: 起爆点から一定速度で沈降
//!
//! 状態を持たないため、最適化中に並列に呼び出しても安全です。

use crate::models::{
    common::{Acceleration3D, Position3D, Velocity3D},
    error::ModelError,
    traits::ITrajectory,
};

/// 物理定数の組
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhysicsModel {
    /// 重力加速度ベクトル（m/s²）
    pub gravity: Acceleration3D,
    /// 煙幕雲の沈降速度ベクトル（m/s）
    pub cloud_sink: Velocity3D,
    /// 煙幕雲の有効半径（m）
    pub smoke_radius: f64,
    /// 起爆後に煙幕が有効な時間（秒）
    pub smoke_lifespan: f64,
}

impl Default for PhysicsModel {
    fn default() -> Self {
        Self {
            gravity: Acceleration3D::new(0.0, 0.0, -9.8),
            cloud_sink: Velocity3D::new(0.0, 0.0, -3.0),
            smoke_radius: 10.0,
            smoke_lifespan: 20.0,
        }
    }
}

/// ミサイルの飛翔経路
///
/// 構築時に方向ベクトルを検証するため、ホットループ内で NaN が発生することはありません。
#[derive(Debug, Clone, PartialEq)]
pub struct MissileTrack {
    pub id: String,
    pub start: Position3D,
    pub aim_point: Position3D,
    pub speed: f64,
    pub velocity: Velocity3D,
}

impl MissileTrack {
    /// 新しいミサイル経路を作成します
    ///
    /// # 引数
    ///
    /// * `id` - ミサイルの識別子
    /// * `start` - 初期位置
    /// * `aim_point` - 照準点（通常は偽目標）
    /// * `speed` - 速さ（m/s）
    ///
    /// # 戻り値
    ///
    /// 初期位置と照準点が一致する場合は `ModelError::DegenerateDirection`
    pub fn new(id: impl Into<String>, start: Position3D, aim_point: Position3D, speed: f64) -> Result<Self, ModelError> {
        if !speed.is_finite() || speed <= 0.0 {
            return Err(ModelError::InvalidSpeed { speed });
        }
        if !start.is_finite() || !aim_point.is_finite() {
            return Err(ModelError::NonFinite {
                what: "ミサイル初期位置 / 照準点".to_string(),
            });
        }
        let unit = start.unit_direction_to(&aim_point)?;
        Ok(Self {
            id: id.into(),
            start,
            aim_point,
            speed,
            velocity: Velocity3D::along(unit, speed),
        })
    }

    /// `start + speed * unit(aim - start) * t`
    pub fn position(&self, t: f64) -> Position3D {
        self.start.advance(self.velocity, t)
    }

    /// 照準点までの経路長（m）
    pub fn path_length(&self) -> f64 {
        self.start.distance_3d(&self.aim_point)
    }

    /// 照準点到達までの時間（秒）
    pub fn time_to_impact(&self) -> f64 {
        self.path_length() / self.speed
    }

    /// 経路上で `point` に最も近づく時刻と、その時の距離
    ///
    /// 探索範囲は発射から照準点到達までの区間に限られます。
    pub fn closest_approach(&self, point: &Position3D) -> (f64, f64) {
        let unit = Position3D::new(
            self.velocity.x / self.speed,
            self.velocity.y / self.speed,
            self.velocity.z / self.speed,
        );
        let along = unit.dot(&(*point - self.start)).clamp(0.0, self.path_length());
        let closest = self.start + unit * along;
        (along / self.speed, closest.distance_3d(point))
    }
}

impl ITrajectory for MissileTrack {
    fn position_at(&self, t: f64) -> Position3D {
        self.position(t)
    }
}

/// 無人機の飛行経路（等速直線）
#[derive(Debug, Clone, PartialEq)]
pub struct UavTrack {
    pub id: String,
    pub start: Position3D,
    pub velocity: Velocity3D,
}

impl UavTrack {
    pub fn new(id: impl Into<String>, start: Position3D, velocity: Velocity3D) -> Self {
        Self {
            id: id.into(),
            start,
            velocity,
        }
    }

    /// 速さと方位角（度）から経路を作成
    pub fn from_speed_heading(id: impl Into<String>, start: Position3D, speed: f64, heading_deg: f64) -> Self {
        Self::new(id, start, Velocity3D::from_speed_heading(speed, heading_deg))
    }

    /// `start + velocity * t`
    pub fn position(&self, t: f64) -> Position3D {
        self.start.advance(self.velocity, t)
    }

    /// 煙幕弾の起爆位置
    ///
    /// 投下位置 `position(release_time)` から、無人機速度を初速とした放物運動を
    /// `fuse_delay` 秒間行った位置を返します。
    pub fn detonation_position(&self, release_time: f64, fuse_delay: f64, gravity: Acceleration3D) -> Position3D {
        detonation_position(self.position(release_time), self.velocity, fuse_delay, gravity)
    }
}

impl ITrajectory for UavTrack {
    fn position_at(&self, t: f64) -> Position3D {
        self.position(t)
    }
}

/// 放物運動の終点: `p_release + v * Δt + 0.5 * g * Δt²`
pub fn detonation_position(
    release_position: Position3D,
    release_velocity: Velocity3D,
    fuse_delay: f64,
    gravity: Acceleration3D,
) -> Position3D {
    release_position.ballistic(release_velocity, gravity, fuse_delay)
}

/// 時刻 `t` の煙幕雲中心: `detonation_position + sink * (t - detonation_time)`
///
/// `t >= detonation_time` の範囲でのみ意味を持ちます。有効判定は呼び出し側の責務です。
pub fn cloud_center(t: f64, detonation_position: Position3D, detonation_time: f64, sink: Velocity3D) -> Position3D {
    detonation_position.advance(sink, t - detonation_time)
}

/// 投下から起爆までの煙幕弾の軌跡
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GrenadeArc {
    pub release_time: f64,
    pub fuse_delay: f64,
    pub release_position: Position3D,
    pub release_velocity: Velocity3D,
    pub gravity: Acceleration3D,
}

impl GrenadeArc {
    pub fn detonation_time(&self) -> f64 {
        self.release_time + self.fuse_delay
    }
}

impl ITrajectory for GrenadeArc {
    /// 投下前は投下点、起爆後は起爆点に留まります
    fn position_at(&self, t: f64) -> Position3D {
        let elapsed = (t - self.release_time).clamp(0.0, self.fuse_delay);
        self.release_position.ballistic(self.release_velocity, self.gravity, elapsed)
    }

    fn start_time(&self) -> f64 {
        self.release_time
    }
}

/// 起爆後の煙幕雲の軌跡
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CloudTrack {
    pub detonation_time: f64,
    pub detonation_position: Position3D,
    pub sink: Velocity3D,
}

impl ITrajectory for CloudTrack {
    fn position_at(&self, t: f64) -> Position3D {
        cloud_center(t.max(self.detonation_time), self.detonation_position, self.detonation_time, self.sink)
    }

    fn start_time(&self) -> f64 {
        self.detonation_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: Position3D, expected: Position3D) {
        assert!(
            actual.distance_3d(&expected) < 1e-9,
            "actual {actual} expected {expected}"
        );
    }

    #[test]
    fn test_projectile_detonation_position() {
        let p = detonation_position(
            Position3D::new(0.0, 0.0, 100.0),
            Velocity3D::new(10.0, 0.0, 0.0),
            2.0,
            Acceleration3D::new(0.0, 0.0, -9.8),
        );
        assert_close(p, Position3D::new(20.0, 0.0, 80.4));
    }

    #[test]
    fn test_missile_rejects_coincident_aim() {
        let start = Position3D::new(100.0, 0.0, 10.0);
        let err = MissileTrack::new("M1", start, start, 300.0).unwrap_err();
        assert!(matches!(err, ModelError::DegenerateDirection { .. }));
    }

    #[test]
    fn test_missile_rejects_invalid_speed() {
        let start = Position3D::new(100.0, 0.0, 10.0);
        assert!(MissileTrack::new("M1", start, Position3D::ORIGIN, 0.0).is_err());
        assert!(MissileTrack::new("M1", start, Position3D::ORIGIN, f64::NAN).is_err());
    }

    #[test]
    fn test_missile_moves_toward_aim() {
        let missile = MissileTrack::new("M1", Position3D::new(20000.0, 0.0, 2000.0), Position3D::ORIGIN, 300.0).unwrap();
        let t_hit = missile.time_to_impact();
        assert_close(missile.position(t_hit), Position3D::ORIGIN);
        assert!((missile.position(1.0).distance_3d(&missile.start) - 300.0).abs() < 1e-9);
    }

    #[test]
    fn test_closest_approach_clamped_to_path() {
        let missile = MissileTrack::new("M1", Position3D::new(100.0, 0.0, 0.0), Position3D::ORIGIN, 10.0).unwrap();
        // 経路の途中で最接近
        let (t, d) = missile.closest_approach(&Position3D::new(50.0, 5.0, 0.0));
        assert!((t - 5.0).abs() < 1e-9);
        assert!((d - 5.0).abs() < 1e-9);
        // 照準点の先にある点は照準点で最接近
        let (t, d) = missile.closest_approach(&Position3D::new(-30.0, 40.0, 0.0));
        assert!((t - 10.0).abs() < 1e-9);
        assert!((d - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_uav_detonation_matches_free_function() {
        let uav = UavTrack::from_speed_heading("FY1", Position3D::new(17800.0, 0.0, 1800.0), 120.0, 180.0);
        let gravity = Acceleration3D::new(0.0, 0.0, -9.8);
        let p = uav.detonation_position(1.5, 3.6, gravity);
        // 投下点 x = 17800 - 180, 起爆点 x = 17620 - 432
        assert!((p.x - 17188.0).abs() < 1e-9);
        assert!(p.y.abs() < 1e-9);
        assert!((p.z - (1800.0 - 0.5 * 9.8 * 3.6 * 3.6)).abs() < 1e-9);
    }

    #[test]
    fn test_cloud_sinks() {
        let det = Position3D::new(0.0, 0.0, 100.0);
        let c = cloud_center(12.0, det, 2.0, Velocity3D::new(0.0, 0.0, -3.0));
        assert_close(c, Position3D::new(0.0, 0.0, 70.0));
    }

    #[test]
    fn test_grenade_arc_endpoints() {
        let arc = GrenadeArc {
            release_time: 1.0,
            fuse_delay: 2.0,
            release_position: Position3D::new(0.0, 0.0, 100.0),
            release_velocity: Velocity3D::new(10.0, 0.0, 0.0),
            gravity: Acceleration3D::new(0.0, 0.0, -9.8),
        };
        assert_close(arc.position_at(0.0), arc.release_position);
        assert_close(arc.position_at(3.0), Position3D::new(20.0, 0.0, 80.4));
        assert_close(arc.position_at(10.0), Position3D::new(20.0, 0.0, 80.4));
        assert_eq!(arc.detonation_time(), 3.0);
    }
}
