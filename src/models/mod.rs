// 基本的なデータ型と数学ユーティリティ
pub mod common;

// エラー定義
pub mod error;

// 運動体の基本インターフェース（trait）定義
pub mod traits;

// 運動モデルと遮蔽判定
pub mod kinematics;
pub mod occlusion;

// 便利な re-export
pub use common::*;
pub use error::ModelError;
pub use traits::*;
pub use kinematics::{CloudTrack, GrenadeArc, MissileTrack, PhysicsModel, UavTrack, cloud_center, detonation_position};
pub use occlusion::segment_intersects_sphere;
