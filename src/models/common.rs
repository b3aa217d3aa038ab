use std::fmt;
use std::ops::{Add, Mul, Sub};

use serde::Serialize;

use crate::models::error::ModelError;

/// 3次元位置を表す構造体
///
/// 差分（`a - b`）も同じ型で表します。
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Position3D {
    pub x: f64, // m
    pub y: f64, // m
    pub z: f64, // m (altitude)
}

impl Position3D {
    pub const ORIGIN: Position3D = Position3D { x: 0.0, y: 0.0, z: 0.0 };

    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// 3次元距離を計算
    pub fn distance_3d(&self, other: &Position3D) -> f64 {
        (*self - *other).magnitude()
    }

    /// 内積
    pub fn dot(&self, other: &Position3D) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    /// ベクトルの長さの二乗
    pub fn magnitude_squared(&self) -> f64 {
        self.dot(self)
    }

    /// ベクトルの長さ（原点からの距離）
    pub fn magnitude(&self) -> f64 {
        self.magnitude_squared().sqrt()
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    /// `self` から `other` へ向かう単位ベクトル
    ///
    /// 2点が一致する場合は `ModelError::DegenerateDirection` を返します。
    pub fn unit_direction_to(&self, other: &Position3D) -> Result<Position3D, ModelError> {
        let delta = *other - *self;
        let length = delta.magnitude();
        if !length.is_finite() {
            return Err(ModelError::NonFinite {
                what: "方向ベクトル".to_string(),
            });
        }
        if length <= f64::EPSILON {
            return Err(ModelError::DegenerateDirection { from: *self, to: *other });
        }
        Ok(delta * (1.0 / length))
    }

    /// 等速直線運動: `p + v * dt`
    pub fn advance(&self, velocity: Velocity3D, dt: f64) -> Position3D {
        Position3D::new(
            self.x + velocity.x * dt,
            self.y + velocity.y * dt,
            self.z + velocity.z * dt,
        )
    }

    /// 等加速度運動: `p + v * dt + 0.5 * a * dt²`
    pub fn ballistic(&self, velocity: Velocity3D, acceleration: Acceleration3D, dt: f64) -> Position3D {
        let half_dt2 = 0.5 * dt * dt;
        Position3D::new(
            self.x + velocity.x * dt + acceleration.x * half_dt2,
            self.y + velocity.y * dt + acceleration.y * half_dt2,
            self.z + velocity.z * dt + acceleration.z * half_dt2,
        )
    }
}

impl fmt::Display for Position3D {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.2}, {:.2}, {:.2})", self.x, self.y, self.z)
    }
}

impl Add for Position3D {
    type Output = Self;

    fn add(self, other: Self) -> Self::Output {
        Self::new(self.x + other.x, self.y + other.y, self.z + other.z)
    }
}

impl Sub for Position3D {
    type Output = Self;

    fn sub(self, other: Self) -> Self::Output {
        Self::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }
}

impl Mul<f64> for Position3D {
    type Output = Self;

    fn mul(self, scalar: f64) -> Self::Output {
        Self::new(self.x * scalar, self.y * scalar, self.z * scalar)
    }
}

/// 3次元速度を表す構造体
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Velocity3D {
    pub x: f64, // m/s
    pub y: f64, // m/s
    pub z: f64, // m/s
}

impl Velocity3D {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// 水平面内の速度ベクトルを速さと方位角から生成
    ///
    /// 方位角は +X 軸から反時計回りの度数。高度方向の成分は 0 です。
    pub fn from_speed_heading(speed: f64, heading_deg: f64) -> Self {
        let heading = math_utils::deg_to_rad(heading_deg);
        Self::new(speed * heading.cos(), speed * heading.sin(), 0.0)
    }

    /// 単位方向ベクトルに速さを掛けた速度
    pub fn along(unit_direction: Position3D, speed: f64) -> Self {
        Self::new(
            unit_direction.x * speed,
            unit_direction.y * speed,
            unit_direction.z * speed,
        )
    }

    /// XY平面での方位角（度、0〜360）
    pub fn heading_deg(&self) -> f64 {
        math_utils::normalize_heading(math_utils::rad_to_deg(self.y.atan2(self.x)))
    }
}

/// 3次元加速度を表す構造体
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Acceleration3D {
    pub x: f64, // m/s²
    pub y: f64, // m/s²
    pub z: f64, // m/s²
}

impl Acceleration3D {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// 数学ユーティリティ関数
pub mod math_utils {
    /// 度をラジアンに変換
    pub fn deg_to_rad(degrees: f64) -> f64 {
        degrees.to_radians()
    }

    /// ラジアンを度に変換
    pub fn rad_to_deg(radians: f64) -> f64 {
        radians.to_degrees()
    }

    /// 方位角を 0度〜360度 の範囲に正規化
    pub fn normalize_heading(angle_deg: f64) -> f64 {
        let normalized = angle_deg.rem_euclid(360.0);
        // rem_euclid は丸めで 360.0 を返すことがある
        if normalized >= 360.0 { 0.0 } else { normalized }
    }
}
