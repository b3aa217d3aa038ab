use thiserror::Error;

use crate::models::common::Position3D;

/// 運動モデル構築時のエラー
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    /// 方向ベクトルの長さがゼロ（始点と終点が一致）
    #[error("方向ベクトルが縮退しています: {from} -> {to}")]
    DegenerateDirection { from: Position3D, to: Position3D },

    /// 速さが正の有限値でない
    #[error("速さが不正です: {speed}")]
    InvalidSpeed { speed: f64 },

    /// 非有限値（NaN / inf）が入力された
    #[error("非有限値が含まれています: {what}")]
    NonFinite { what: String },
}
