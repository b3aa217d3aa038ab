//! # smokesim
//!
//! 無人機から投下する煙幕弾で、飛来ミサイルから真目標への視線を遮る時間を
//! 評価・最適化するシミュレーターです。
//!
//! - `models`: 運動モデル（ミサイル・無人機・煙幕弾・煙幕雲）と遮蔽判定
//! - `fitness`: 戦略ベクトルの復号と遮蔽時間の評価
//! - `pso`: 粒子群最適化
//! - `allocation`: 複数ミサイルへの任務割り当て
//! - `scenario` / `context`: シナリオファイルと実行時設定
//! - `simulation`: タスク実行エンジン
//! - `trace`: 描画用の軌跡
//! - `logging`: ログ出力

pub mod allocation;
pub mod context;
pub mod fitness;
pub mod logging;
pub mod models;
pub mod pso;
pub mod scenario;
pub mod simulation;
pub mod trace;
