use crate::models::common::Position3D;

/// 時刻から位置が一意に決まる（閉形式の）運動体のインターフェース
pub trait ITrajectory {
    /// 時刻 `t`（秒）における位置
    fn position_at(&self, t: f64) -> Position3D;

    /// 軌跡が有効となる開始時刻
    fn start_time(&self) -> f64 {
        0.0
    }

    /// 時刻列に沿って位置をサンプリング
    fn sample(&self, times: &[f64]) -> Vec<Position3D> {
        times.iter().map(|&t| self.position_at(t)).collect()
    }
}
