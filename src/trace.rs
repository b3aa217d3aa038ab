//! # Trace モジュール
//!
//! 描画用に、各実体の位置を時刻付きの列としてサンプリングします。
//! 描画側には戦略ベクトルではなく、この時系列のみを渡します。

use serde::Serialize;
use std::fs;
use std::path::Path;

use crate::fitness::{DecodedStrategy, FitnessEvaluator};
use crate::models::{ITrajectory, Position3D};

/// 既定の描画用時間刻み（秒）
pub const DEFAULT_RENDER_DT: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PathKind {
    Missile,
    Uav,
    Grenade,
    Cloud,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TimedPosition {
    pub t: f64,
    pub position: Position3D,
}

/// 1 実体分の軌跡
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityPath {
    pub id: String,
    pub kind: PathKind,
    pub samples: Vec<TimedPosition>,
}

/// 保護対象の描画情報
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TargetShape {
    pub center: Position3D,
    pub radius_m: f64,
    pub height_m: f64,
}

/// 描画用の軌跡一式
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrajectoryTrace {
    pub task: String,
    pub dt_s: f64,
    pub smoke_radius_m: f64,
    pub target: Option<TargetShape>,
    pub paths: Vec<EntityPath>,
}

/// `[start, end]` を `dt` 刻みで区切った時刻列（終端を含む）
pub fn sample_times(start: f64, end: f64, dt: f64) -> Vec<f64> {
    if !(dt > 0.0) || !(end >= start) {
        return Vec::new();
    }
    let count = ((end - start) / dt + 1e-9).floor() as usize;
    let mut times: Vec<f64> = (0..=count).map(|i| start + i as f64 * dt).collect();
    if let Some(&last) = times.last() {
        if end - last > 1e-9 {
            times.push(end);
        }
    }
    times
}

fn sample_path(id: impl Into<String>, kind: PathKind, trajectory: &dyn ITrajectory, times: Vec<f64>) -> EntityPath {
    let positions = trajectory.sample(&times);
    EntityPath {
        id: id.into(),
        kind,
        samples: times
            .into_iter()
            .zip(positions)
            .map(|(t, position)| TimedPosition { t, position })
            .collect(),
    }
}

impl TrajectoryTrace {
    /// 復号済み戦略の軌跡を作成します
    ///
    /// # 引数
    ///
    /// * `task` - タスク名
    /// * `evaluator` - ミサイル・物理定数・時間軸の参照元
    /// * `decoded` - 描画する戦略
    /// * `render_dt` - サンプリング間隔
    pub fn from_strategy(task: &str, evaluator: &FitnessEvaluator, decoded: &DecodedStrategy, render_dt: f64) -> Self {
        let horizon = evaluator.grid.horizon();
        let physics = &evaluator.physics;
        let missile = &evaluator.missile;
        let mut paths = Vec::new();

        paths.push(sample_path(
            missile.id.clone(),
            PathKind::Missile,
            missile,
            sample_times(0.0, missile.time_to_impact().min(horizon), render_dt),
        ));

        for (track, plan) in decoded.tracks.iter().zip(&decoded.plans) {
            let last_release = plan.release_times.iter().copied().fold(0.0, f64::max);
            paths.push(sample_path(
                track.id.clone(),
                PathKind::Uav,
                track,
                sample_times(0.0, last_release.min(horizon), render_dt),
            ));
        }

        // 煙幕源は無人機ごとに投下順で並ぶ
        let mut sources = decoded.sources.iter();
        for (track, plan) in decoded.tracks.iter().zip(&decoded.plans) {
            for (number, source) in (1..=plan.release_times.len()).zip(sources.by_ref()) {
                let label = format!("{}-{}", track.id, number);

                let arc = source.grenade_arc(physics);
                paths.push(sample_path(
                    label.clone(),
                    PathKind::Grenade,
                    &arc,
                    sample_times(arc.start_time(), arc.detonation_time().min(horizon), render_dt),
                ));

                let cloud = source.cloud_track(physics);
                let expiry = (source.detonation_time + physics.smoke_lifespan).min(horizon);
                paths.push(sample_path(
                    label,
                    PathKind::Cloud,
                    &cloud,
                    sample_times(cloud.start_time(), expiry, render_dt),
                ));
            }
        }

        Self {
            task: task.to_string(),
            dt_s: render_dt,
            smoke_radius_m: physics.smoke_radius,
            target: None,
            paths,
        }
    }

    pub fn with_target(mut self, target: TargetShape) -> Self {
        self.target = Some(target);
        self
    }

    /// 指定した種類の軌跡
    pub fn paths_of(&self, kind: PathKind) -> impl Iterator<Item = &EntityPath> {
        self.paths.iter().filter(move |p| p.kind == kind)
    }
}

/// 軌跡一式を YAML として書き出します
pub fn write_traces<P: AsRef<Path>>(path: P, traces: &[TrajectoryTrace]) -> Result<(), Box<dyn std::error::Error>> {
    let yaml = serde_yaml::to_string(traces)?;
    fs::write(path, yaml)?;
    Ok(())
}
