//! # Fitness モジュール
//!
//! 戦略ベクトルを煙幕源に復号し、時間離散化した積分で遮蔽時間（秒）を求めます。
//!
//! ## 戦略ベクトルの配置
//!
//! 無人機 1 機あたり `[速さ, 方位角, 初回投下時刻, 投下間隔_2, …, 投下間隔_k]`、
//! 末尾に全弾共通の引信遅延を 1 つ置きます。次元数は `機数 × (2 + k) + 1` です。
//! 2 発目以降は直前の投下からの間隔で表すため、間隔の下限を再装填間隔に
//! 設定すれば境界クランプだけで再装填制約が常に満たされます。
//!
//! ## 失敗時の扱い
//!
//! 復号・計算時のエラーは `EvaluationOutcome::Failed` として返され、
//! 最適化器には `EvaluationOutcome::fitness_or_sentinel` を通じて
//! `FAILED_FITNESS` が渡されます。

use thiserror::Error;
use tracing::trace;

use crate::models::{
    CloudTrack, GrenadeArc, MissileTrack, ModelError, PhysicsModel, Position3D, UavTrack,
    Velocity3D, cloud_center, math_utils, segment_intersects_sphere,
};
use crate::pso::Objective;

/// 全ての比較評価で共通に使う時間刻み（秒）
pub const DEFAULT_DT: f64 = 0.01;

/// 既定のシミュレーション終了時刻（秒）
pub const DEFAULT_HORIZON: f64 = 70.0;

/// 評価に失敗した候補に与える適応度
///
/// 最大化の枠組みで一貫して使う唯一の値です。0 より大きく、実際に遮蔽を
/// 得た戦略の最小値 `dt` よりは十分小さくなります。
pub const FAILED_FITNESS: f64 = 1e-6;

const GRID_EPSILON: f64 = 1e-9;

/// 評価時のエラー
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvaluationError {
    #[error("戦略ベクトルの次元が一致しません: 期待値 {expected}, 実際 {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("戦略ベクトルの {index} 番目の要素が有限値ではありません")]
    NonFinite { index: usize },

    #[error("{what} が負の値です: {value}")]
    NegativeTime { what: &'static str, value: f64 },

    #[error("引信遅延は全機で共通です: {expected} と {got}")]
    MixedFuseDelay { expected: f64, got: f64 },

    #[error(transparent)]
    Model(#[from] ModelError),
}

/// 1 回の評価結果
#[derive(Debug, Clone, PartialEq)]
pub enum EvaluationOutcome {
    Ok(f64),
    Failed(EvaluationError),
}

impl EvaluationOutcome {
    /// 最適化器へ渡す値。失敗時は `FAILED_FITNESS`
    pub fn fitness_or_sentinel(&self) -> f64 {
        match self {
            EvaluationOutcome::Ok(value) => *value,
            EvaluationOutcome::Failed(_) => FAILED_FITNESS,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, EvaluationOutcome::Ok(_))
    }
}

impl From<Result<f64, EvaluationError>> for EvaluationOutcome {
    fn from(result: Result<f64, EvaluationError>) -> Self {
        match result {
            Ok(value) => EvaluationOutcome::Ok(value),
            Err(err) => EvaluationOutcome::Failed(err),
        }
    }
}

/// 固定刻みの時間軸
///
/// サンプル時刻は `t_i = i * dt`（`i = 0 .. steps`）で、各サンプルは区間
/// `[t_i, t_i + dt)` を代表します。`steps * dt` は終了時刻を超えません。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeGrid {
    pub dt: f64,
    pub steps: usize,
}

impl TimeGrid {
    pub fn new(dt: f64, horizon: f64) -> Self {
        let steps = if dt > 0.0 && horizon > 0.0 {
            (horizon / dt + GRID_EPSILON).floor() as usize
        } else {
            0
        };
        Self { dt, steps }
    }

    pub fn time_at(&self, step: usize) -> f64 {
        step as f64 * self.dt
    }

    pub fn horizon(&self) -> f64 {
        self.steps as f64 * self.dt
    }

    /// `[start, start + duration)` に含まれるサンプルの添字範囲
    pub fn window(&self, start: f64, duration: f64) -> std::ops::Range<usize> {
        let first = (start / self.dt - GRID_EPSILON).ceil().max(0.0) as usize;
        let len = (duration / self.dt + GRID_EPSILON).floor().max(0.0) as usize;
        let first = first.min(self.steps);
        first..first.saturating_add(len).min(self.steps)
    }
}

impl Default for TimeGrid {
    fn default() -> Self {
        Self::new(DEFAULT_DT, DEFAULT_HORIZON)
    }
}

/// 決定変数の探索範囲
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchBounds {
    pub speed: (f64, f64),
    pub heading_deg: (f64, f64),
    pub release: (f64, f64),
    pub release_gap: (f64, f64),
    pub fuse_delay: (f64, f64),
}

impl Default for SearchBounds {
    fn default() -> Self {
        Self {
            speed: (70.0, 140.0),
            heading_deg: (0.0, 360.0),
            release: (0.1, 40.0),
            release_gap: (1.0, 10.0),
            fuse_delay: (0.1, 15.0),
        }
    }
}

/// 戦略ベクトルに登場する無人機
#[derive(Debug, Clone, PartialEq)]
pub struct UavSlot {
    pub id: String,
    pub start: Position3D,
}

/// 1 機分の投下計画（絶対時刻）
#[derive(Debug, Clone, PartialEq)]
pub struct UavPlan {
    pub uav_id: String,
    pub speed: f64,
    pub heading_deg: f64,
    pub release_times: Vec<f64>,
    pub fuse_delay: f64,
}

/// 1 発分の煙幕源
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SmokeSource {
    pub release_time: f64,
    pub fuse_delay: f64,
    pub release_position: Position3D,
    pub release_velocity: Velocity3D,
    pub detonation_time: f64,
    pub detonation_position: Position3D,
}

impl SmokeSource {
    /// 無人機経路・投下時刻・引信遅延から煙幕源を生成
    pub fn from_release(uav: &UavTrack, release_time: f64, fuse_delay: f64, physics: &PhysicsModel) -> Self {
        Self {
            release_time,
            fuse_delay,
            release_position: uav.position(release_time),
            release_velocity: uav.velocity,
            detonation_time: release_time + fuse_delay,
            detonation_position: uav.detonation_position(release_time, fuse_delay, physics.gravity),
        }
    }

    pub fn cloud_center(&self, t: f64, sink: Velocity3D) -> Position3D {
        cloud_center(t, self.detonation_position, self.detonation_time, sink)
    }

    pub fn grenade_arc(&self, physics: &PhysicsModel) -> GrenadeArc {
        GrenadeArc {
            release_time: self.release_time,
            fuse_delay: self.fuse_delay,
            release_position: self.release_position,
            release_velocity: self.release_velocity,
            gravity: physics.gravity,
        }
    }

    pub fn cloud_track(&self, physics: &PhysicsModel) -> CloudTrack {
        CloudTrack {
            detonation_time: self.detonation_time,
            detonation_position: self.detonation_position,
            sink: physics.cloud_sink,
        }
    }
}

/// 復号済みの戦略
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedStrategy {
    pub plans: Vec<UavPlan>,
    pub tracks: Vec<UavTrack>,
    /// 無人機順・投下順に並んだ煙幕源
    pub sources: Vec<SmokeSource>,
}

/// 戦略ベクトルの配置
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyLayout {
    pub uavs: Vec<UavSlot>,
    pub canisters_per_uav: usize,
}

impl StrategyLayout {
    /// 1 機あたりの弾数は 1 以上に切り上げます
    pub fn new(uavs: Vec<UavSlot>, canisters_per_uav: usize) -> Self {
        Self {
            uavs,
            canisters_per_uav: canisters_per_uav.max(1),
        }
    }

    pub fn params_per_uav(&self) -> usize {
        2 + self.canisters_per_uav
    }

    pub fn dimensions(&self) -> usize {
        self.uavs.len() * self.params_per_uav() + 1
    }

    /// 各次元の探索範囲
    pub fn bounds(&self, bounds: &SearchBounds) -> Vec<(f64, f64)> {
        let mut out = Vec::with_capacity(self.dimensions());
        for _ in &self.uavs {
            out.push(bounds.speed);
            out.push(bounds.heading_deg);
            out.push(bounds.release);
            for _ in 1..self.canisters_per_uav {
                out.push(bounds.release_gap);
            }
        }
        out.push(bounds.fuse_delay);
        out
    }

    /// 戦略ベクトルを投下計画へ復号
    pub fn decode_plans(&self, x: &[f64]) -> Result<Vec<UavPlan>, EvaluationError> {
        if x.len() != self.dimensions() {
            return Err(EvaluationError::DimensionMismatch {
                expected: self.dimensions(),
                got: x.len(),
            });
        }
        if let Some(index) = x.iter().position(|v| !v.is_finite()) {
            return Err(EvaluationError::NonFinite { index });
        }

        let fuse_delay = x[x.len() - 1];
        if fuse_delay < 0.0 {
            return Err(EvaluationError::NegativeTime {
                what: "引信遅延",
                value: fuse_delay,
            });
        }

        let mut plans = Vec::with_capacity(self.uavs.len());
        for (slot, chunk) in self.uavs.iter().zip(x.chunks_exact(self.params_per_uav())) {
            let first_release = chunk[2];
            if first_release < 0.0 {
                return Err(EvaluationError::NegativeTime {
                    what: "投下時刻",
                    value: first_release,
                });
            }

            let mut release_times = Vec::with_capacity(self.canisters_per_uav);
            let mut release = first_release;
            release_times.push(release);
            for &gap in &chunk[3..] {
                if gap < 0.0 {
                    return Err(EvaluationError::NegativeTime {
                        what: "投下間隔",
                        value: gap,
                    });
                }
                release += gap;
                release_times.push(release);
            }

            plans.push(UavPlan {
                uav_id: slot.id.clone(),
                speed: chunk[0],
                heading_deg: chunk[1],
                release_times,
                fuse_delay,
            });
        }
        Ok(plans)
    }

    /// 戦略ベクトルを無人機経路と煙幕源へ復号
    pub fn decode(&self, x: &[f64], physics: &PhysicsModel) -> Result<DecodedStrategy, EvaluationError> {
        let plans = self.decode_plans(x)?;
        let mut tracks = Vec::with_capacity(plans.len());
        let mut sources = Vec::with_capacity(plans.len() * self.canisters_per_uav);

        for (slot, plan) in self.uavs.iter().zip(&plans) {
            let track = UavTrack::from_speed_heading(slot.id.clone(), slot.start, plan.speed, plan.heading_deg);
            for &release_time in &plan.release_times {
                let source = SmokeSource::from_release(&track, release_time, plan.fuse_delay, physics);
                if !source.detonation_position.is_finite() {
                    return Err(ModelError::NonFinite {
                        what: format!("{} の起爆位置", slot.id),
                    }
                    .into());
                }
                sources.push(source);
            }
            tracks.push(track);
        }

        Ok(DecodedStrategy { plans, tracks, sources })
    }

    /// 投下計画（絶対時刻）を戦略ベクトルへ符号化
    ///
    /// 引信遅延は先頭の計画の値を使います。
    pub fn encode(&self, plans: &[UavPlan]) -> Result<Vec<f64>, EvaluationError> {
        if plans.len() != self.uavs.len() {
            return Err(EvaluationError::DimensionMismatch {
                expected: self.uavs.len(),
                got: plans.len(),
            });
        }
        let fuse_delay = plans.first().map(|p| p.fuse_delay).unwrap_or_default();
        let mut x = Vec::with_capacity(self.dimensions());
        for plan in plans {
            if plan.fuse_delay != fuse_delay {
                return Err(EvaluationError::MixedFuseDelay {
                    expected: fuse_delay,
                    got: plan.fuse_delay,
                });
            }
            if plan.release_times.len() != self.canisters_per_uav {
                return Err(EvaluationError::DimensionMismatch {
                    expected: self.canisters_per_uav,
                    got: plan.release_times.len(),
                });
            }
            x.push(plan.speed);
            x.push(plan.heading_deg);
            x.push(plan.release_times[0]);
            for pair in plan.release_times.windows(2) {
                x.push(pair[1] - pair[0]);
            }
        }
        x.push(fuse_delay);
        Ok(x)
    }

    /// 合流点を目指す初期解を生成
    ///
    /// 各無人機は最大速度で合流点の方位へ飛び、到達予想時刻から引信遅延を
    /// 引いた時刻（下限以上）に初弾を投下します。2 発目以降は最小間隔で投下します。
    pub fn rendezvous_seed(&self, point: Position3D, fuse_delay: f64, bounds: &SearchBounds) -> Vec<f64> {
        let speed = bounds.speed.1;
        let mut x = Vec::with_capacity(self.dimensions());
        for slot in &self.uavs {
            let delta = point - slot.start;
            let heading = math_utils::normalize_heading(math_utils::rad_to_deg(delta.y.atan2(delta.x)));
            let travel_time = slot.start.distance_3d(&point) / speed;
            x.push(speed);
            x.push(heading);
            x.push((travel_time - fuse_delay).max(bounds.release.0));
            for _ in 1..self.canisters_per_uav {
                x.push(bounds.release_gap.0);
            }
        }
        x.push(fuse_delay);
        x
    }
}

/// 遮蔽時間の評価器
///
/// 評価は入力だけで決まる純粋関数で、複数スレッドから同時に呼び出せます。
#[derive(Debug, Clone)]
pub struct FitnessEvaluator {
    pub physics: PhysicsModel,
    pub grid: TimeGrid,
    pub missile: MissileTrack,
    /// 保護対象（真目標）の代表点
    pub target: Position3D,
    pub layout: StrategyLayout,
}

impl FitnessEvaluator {
    pub fn new(
        physics: PhysicsModel,
        grid: TimeGrid,
        missile: MissileTrack,
        target: Position3D,
        layout: StrategyLayout,
    ) -> Self {
        Self {
            physics,
            grid,
            missile,
            target,
            layout,
        }
    }

    pub fn dimensions(&self) -> usize {
        self.layout.dimensions()
    }

    /// 戦略ベクトルを評価
    pub fn evaluate_outcome(&self, x: &[f64]) -> EvaluationOutcome {
        let outcome: EvaluationOutcome = self
            .layout
            .decode(x, &self.physics)
            .map(|decoded| self.occlusion_time(&decoded.sources))
            .into();
        if let EvaluationOutcome::Failed(err) = &outcome {
            trace!(missile_id = %self.missile.id, error = %err, "戦略評価に失敗");
        }
        outcome
    }

    /// 煙幕源の集合による総遮蔽時間（秒）
    pub fn occlusion_time(&self, sources: &[SmokeSource]) -> f64 {
        self.occluded_steps(sources).count() as f64 * self.grid.dt
    }

    /// 遮蔽が連続した時間区間 `[開始, 終了)` の一覧
    pub fn occlusion_intervals(&self, sources: &[SmokeSource]) -> Vec<(f64, f64)> {
        let mut intervals: Vec<(f64, f64)> = Vec::new();
        let mut last_step: Option<usize> = None;
        for step in self.occluded_steps(sources) {
            let t = self.grid.time_at(step);
            match (last_step, intervals.last_mut()) {
                (Some(prev), Some(interval)) if prev + 1 == step => interval.1 = t + self.grid.dt,
                _ => intervals.push((t, t + self.grid.dt)),
            }
            last_step = Some(step);
        }
        intervals
    }

    /// 各時刻で、有効な煙幕源のいずれか 1 つが視線を遮れば遮蔽とみなします
    fn occluded_steps<'a>(&'a self, sources: &'a [SmokeSource]) -> impl Iterator<Item = usize> + 'a {
        let windows: Vec<std::ops::Range<usize>> = sources
            .iter()
            .map(|s| self.grid.window(s.detonation_time, self.physics.smoke_lifespan))
            .collect();
        let first = windows.iter().map(|w| w.start).min().unwrap_or(0);
        let last = windows.iter().map(|w| w.end).max().unwrap_or(0);

        (first..last).filter(move |&step| {
            let t = self.grid.time_at(step);
            let missile_position = self.missile.position(t);
            sources.iter().zip(&windows).any(|(source, window)| {
                window.contains(&step)
                    && segment_intersects_sphere(
                        missile_position,
                        self.target,
                        source.cloud_center(t, self.physics.cloud_sink),
                        self.physics.smoke_radius,
                    )
            })
        })
    }
}

impl Objective for FitnessEvaluator {
    fn evaluate(&self, position: &[f64]) -> f64 {
        self.evaluate_outcome(position).fitness_or_sentinel()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Acceleration3D;

    fn fy1() -> UavSlot {
        UavSlot {
            id: "FY1".to_string(),
            start: Position3D::new(17800.0, 0.0, 1800.0),
        }
    }

    fn evaluator(layout: StrategyLayout) -> FitnessEvaluator {
        let missile = MissileTrack::new("M1", Position3D::new(20000.0, 0.0, 2000.0), Position3D::ORIGIN, 300.0).unwrap();
        FitnessEvaluator::new(
            PhysicsModel::default(),
            TimeGrid::default(),
            missile,
            Position3D::new(0.0, 200.0, 5.0),
            layout,
        )
    }

    #[test]
    fn test_time_grid_steps() {
        let grid = TimeGrid::new(0.01, 70.0);
        assert_eq!(grid.steps, 7000);
        assert!(grid.horizon() <= 70.0 + 1e-9);

        let grid = TimeGrid::new(0.1, 1.05);
        assert_eq!(grid.steps, 10);
    }

    #[test]
    fn test_time_grid_window() {
        let grid = TimeGrid::new(0.01, 70.0);
        let w = grid.window(5.1, 20.0);
        assert_eq!(w, 510..2510);
        // 終了時刻で打ち切り
        let w = grid.window(60.0, 20.0);
        assert_eq!(w.end, 7000);
        // 終了時刻より後は空
        assert!(grid.window(80.0, 20.0).is_empty());
    }

    #[test]
    fn test_layout_dimensions_and_bounds() {
        let layout = StrategyLayout::new(vec![fy1(), fy1()], 3);
        assert_eq!(layout.dimensions(), 2 * 5 + 1);
        let bounds = layout.bounds(&SearchBounds::default());
        assert_eq!(bounds.len(), 11);
        assert_eq!(bounds[3], (1.0, 10.0));
        assert_eq!(bounds[10], (0.1, 15.0));
    }

    #[test]
    fn test_decode_relative_release_times() {
        let layout = StrategyLayout::new(vec![fy1()], 3);
        let plans = layout.decode_plans(&[80.0, 10.0, 0.5, 1.0, 2.5, 3.0]).unwrap();
        assert_eq!(plans[0].release_times, vec![0.5, 1.5, 4.0]);
        assert_eq!(plans[0].fuse_delay, 3.0);

        let encoded = layout.encode(&plans).unwrap();
        assert_eq!(encoded, vec![80.0, 10.0, 0.5, 1.0, 2.5, 3.0]);
    }

    #[test]
    fn test_encode_rejects_mixed_fuse_delays() {
        let layout = StrategyLayout::new(vec![fy1(), fy1()], 1);
        let mut plans = layout.decode_plans(&[120.0, 180.0, 1.5, 120.0, 180.0, 1.5, 3.6]).unwrap();
        assert!(layout.encode(&plans).is_ok());

        plans[1].fuse_delay = 9.0;
        assert_eq!(
            layout.encode(&plans),
            Err(EvaluationError::MixedFuseDelay { expected: 3.6, got: 9.0 })
        );
    }

    #[test]
    fn test_decode_errors() {
        let layout = StrategyLayout::new(vec![fy1()], 1);
        assert!(matches!(
            layout.decode_plans(&[1.0, 2.0]),
            Err(EvaluationError::DimensionMismatch { expected: 4, got: 2 })
        ));
        assert!(matches!(
            layout.decode_plans(&[100.0, f64::NAN, 1.0, 1.0]),
            Err(EvaluationError::NonFinite { index: 1 })
        ));
        assert!(matches!(
            layout.decode_plans(&[100.0, 0.0, 1.0, -1.0]),
            Err(EvaluationError::NegativeTime { .. })
        ));
    }

    #[test]
    fn test_failed_evaluation_maps_to_sentinel() {
        let eval = evaluator(StrategyLayout::new(vec![fy1()], 1));
        let outcome = eval.evaluate_outcome(&[120.0, f64::INFINITY, 1.5, 3.6]);
        assert!(!outcome.is_ok());
        assert_eq!(outcome.fitness_or_sentinel(), FAILED_FITNESS);
        assert_eq!(eval.evaluate(&[120.0]), FAILED_FITNESS);
    }

    #[test]
    fn test_fixed_strategy_occludes() {
        // 速さ 120 m/s で偽目標方向へ飛行、1.5 秒後に投下、3.6 秒後に起爆
        let eval = evaluator(StrategyLayout::new(vec![fy1()], 1));
        let seconds = eval.evaluate(&[120.0, 180.0, 1.5, 3.6]);
        assert!(seconds > 1.0 && seconds < 2.0, "occlusion = {seconds}");

        let decoded = eval.layout.decode(&[120.0, 180.0, 1.5, 3.6], &eval.physics).unwrap();
        let intervals = eval.occlusion_intervals(&decoded.sources);
        let total: f64 = intervals.iter().map(|(a, b)| b - a).sum();
        assert!((total - seconds).abs() < 1e-9);
        assert!(intervals.iter().all(|(a, _)| *a >= 5.1 - 1e-9));
    }

    #[test]
    fn test_evaluation_is_deterministic() {
        let eval = evaluator(StrategyLayout::new(vec![fy1()], 3));
        let x = [80.86, 10.9, 0.1, 1.0, 10.0, 0.106];
        let first = eval.evaluate(&x);
        let second = eval.evaluate(&x);
        assert_eq!(first.to_bits(), second.to_bits());
    }

    #[test]
    fn test_occlusion_bounded_by_lifespan_and_horizon() {
        let eval = evaluator(StrategyLayout::new(vec![fy1()], 3));
        let bounds = eval.layout.bounds(&SearchBounds::default());
        let horizon = eval.grid.horizon();
        let lifespan = eval.physics.smoke_lifespan;
        // 範囲内の格子点を網羅的に評価
        for i in 0..6 {
            for j in 0..6 {
                let x: Vec<f64> = bounds
                    .iter()
                    .enumerate()
                    .map(|(d, (lo, hi))| {
                        let frac = ((i * 7 + j * 3 + d * 5) % 11) as f64 / 10.0;
                        lo + (hi - lo) * frac
                    })
                    .collect();
                let seconds = eval.evaluate(&x);
                assert!(seconds <= 3.0 * lifespan.min(horizon) + 1e-9);
                assert!(seconds <= horizon + 1e-9);
            }
        }
    }

    #[test]
    fn test_single_source_bounded_by_lifespan() {
        // 視線上に静止した巨大な雲は寿命の間だけ遮蔽する
        let mut eval = evaluator(StrategyLayout::new(vec![fy1()], 1));
        eval.physics.smoke_radius = 1.0e6;
        eval.physics.gravity = Acceleration3D::new(0.0, 0.0, 0.0);
        let seconds = eval.evaluate(&[100.0, 0.0, 1.0, 1.0]);
        assert!((seconds - 20.0).abs() < 1e-9, "occlusion = {seconds}");
    }

    #[test]
    fn test_rendezvous_seed_points_at_target() {
        let layout = StrategyLayout::new(vec![fy1()], 2);
        let point = Position3D::new(17800.0, 1400.0, 1800.0);
        let x = layout.rendezvous_seed(point, 2.0, &SearchBounds::default());
        assert_eq!(x.len(), layout.dimensions());
        assert_eq!(x[0], 140.0);
        assert!((x[1] - 90.0).abs() < 1e-9);
        assert!((x[2] - (1400.0 / 140.0 - 2.0)).abs() < 1e-9);
        assert_eq!(x[3], 1.0);
        assert_eq!(x[4], 2.0);
    }
}
