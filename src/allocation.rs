//! # Allocation モジュール
//!
//! 複数ミサイル・複数無人機に対する任務割り当てを行います。
//!
//! ## 処理順序
//!
//! 1. **威脅評価**: 各ミサイルの着弾予想時刻と真目標への最小接近距離から威脅値を算出
//! 2. **割り当て**: 威脅値の降順に、配分表の機数だけ発射点に近い無人機を割り当て
//! 3. **部分問題**: (ミサイル, 編隊) ごとに粒子群最適化を独立に実行
//! 4. **集計**: 最良遮蔽時間の単純和と威脅加重和を算出
//!
//! 部分問題は tokio のブロッキングスレッドで同時に実行し、結果は割り当て順に
//! 回収します。各部分問題は評価器と最適化器を所有し、共有する可変状態は
//! ありません。

use std::cmp::Ordering as CmpOrdering;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::context::{ContextError, ScenarioContext};
use crate::fitness::{EvaluationError, FitnessEvaluator, SearchBounds, SmokeSource, UavPlan, UavSlot};
use crate::models::{MissileTrack, Position3D};
use crate::pso::{ParticleSwarmOptimizer, PsoConfig, PsoError, PsoResult, TracingProgress};

/// 最小接近距離の下限（ゼロ除算防止）
pub const MIN_THREAT_DISTANCE: f64 = 1e-3;

/// 任務割り当てのエラー
#[derive(Error, Debug)]
pub enum AllocationError {
    #[error(transparent)]
    Context(#[from] ContextError),

    #[error("最適化設定エラー: {0}")]
    Pso(#[from] PsoError),

    #[error("最良解の復号に失敗しました: {0}")]
    Evaluation(#[from] EvaluationError),

    #[error("非同期ランタイムの起動に失敗しました: {0}")]
    Runtime(#[source] std::io::Error),

    #[error("部分問題 {missile_id} の実行に失敗しました: {message}")]
    Join { missile_id: String, message: String },
}

/// 威脅値の重み
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThreatWeights {
    pub time_to_impact: f64,
    pub min_distance: f64,
}

impl Default for ThreatWeights {
    fn default() -> Self {
        Self {
            time_to_impact: 0.5,
            min_distance: 0.5,
        }
    }
}

/// ミサイル 1 発の威脅評価
#[derive(Debug, Clone, PartialEq)]
pub struct ThreatAssessment {
    pub missile_id: String,
    pub time_to_impact: f64,
    /// 飛行経路上での真目標への最小距離
    pub min_distance: f64,
    /// 最小距離となる時刻
    pub closest_time: f64,
    pub score: f64,
}

/// 各ミサイルの威脅値を求め、降順（同値は ID 順）に並べます
///
/// 威脅値は `w1 / 着弾予想時刻 + w2 / 最小接近距離` です。
pub fn assess_threats(missiles: &[MissileTrack], target: Position3D, weights: ThreatWeights) -> Vec<ThreatAssessment> {
    let mut threats: Vec<ThreatAssessment> = missiles
        .iter()
        .map(|missile| {
            let time_to_impact = missile.time_to_impact();
            let (closest_time, min_distance) = missile.closest_approach(&target);
            let score = weights.time_to_impact / time_to_impact
                + weights.min_distance / min_distance.max(MIN_THREAT_DISTANCE);
            ThreatAssessment {
                missile_id: missile.id.clone(),
                time_to_impact,
                min_distance,
                closest_time,
                score,
            }
        })
        .collect();

    threats.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(CmpOrdering::Equal)
            .then_with(|| a.missile_id.cmp(&b.missile_id))
    });
    threats
}

/// 1 発のミサイルへの割り当て
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub threat: ThreatAssessment,
    /// 発射点に近い順
    pub uav_ids: Vec<String>,
}

impl Assignment {
    pub fn missile_id(&self) -> &str {
        &self.threat.missile_id
    }

    /// 無人機が割り当てられず、最適化を行わない
    pub fn is_skipped(&self) -> bool {
        self.uav_ids.is_empty()
    }
}

/// 威脅順に、配分表の機数だけ近い無人機を重複なく割り当てます
///
/// # 引数
///
/// * `threats` - 威脅値の降順に並んだ評価結果
/// * `missiles` - 発射点の参照に使うミサイル
/// * `uavs` - 割り当て可能な無人機
/// * `uav_counts` - 威脅順位ごとの機数。不足分の順位には 0 機
///
/// # 戻り値
///
/// `threats` と同じ順の割り当て。無人機が尽きた場合は残りの機数だけ割り当てます。
pub fn allocate(
    threats: &[ThreatAssessment],
    missiles: &[MissileTrack],
    uavs: &[UavSlot],
    uav_counts: &[usize],
) -> Result<Vec<Assignment>, AllocationError> {
    let mut available: Vec<&UavSlot> = uavs.iter().collect();
    let mut assignments = Vec::with_capacity(threats.len());

    for (rank, threat) in threats.iter().enumerate() {
        let missile = missiles
            .iter()
            .find(|m| m.id == threat.missile_id)
            .ok_or_else(|| ContextError::UnknownMissile(threat.missile_id.clone()))?;
        let count = uav_counts.get(rank).copied().unwrap_or(0).min(available.len());

        available.sort_by(|a, b| {
            let da = a.start.distance_3d(&missile.start);
            let db = b.start.distance_3d(&missile.start);
            da.partial_cmp(&db)
                .unwrap_or(CmpOrdering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        let uav_ids: Vec<String> = available.drain(..count).map(|slot| slot.id.clone()).collect();

        debug!(
            missile_id = %threat.missile_id,
            rank,
            uavs = ?uav_ids,
            "無人機を割り当て"
        );
        assignments.push(Assignment {
            threat: threat.clone(),
            uav_ids,
        });
    }

    Ok(assignments)
}

/// 部分問題の最適化規模
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubproblemBudget {
    pub particles_per_dim: usize,
    pub iterations_per_dim: usize,
    pub min_iterations: usize,
    pub small_dim_threshold: usize,
}

impl Default for SubproblemBudget {
    fn default() -> Self {
        Self {
            particles_per_dim: 10,
            iterations_per_dim: 25,
            min_iterations: 200,
            small_dim_threshold: 10,
        }
    }
}

impl SubproblemBudget {
    /// 次元数から `(粒子数, 反復回数)` を決めます
    pub fn sizing(&self, dimensions: usize) -> (usize, usize) {
        let particles = self.particles_per_dim * dimensions;
        let iterations = if dimensions < self.small_dim_threshold {
            self.min_iterations
        } else {
            self.iterations_per_dim * dimensions
        };
        (particles, iterations)
    }
}

/// 最適化した戦略
#[derive(Debug, Clone)]
pub struct SolvedStrategy {
    pub pso: PsoResult,
    pub plans: Vec<UavPlan>,
    pub sources: Vec<SmokeSource>,
    pub intervals: Vec<(f64, f64)>,
}

impl SolvedStrategy {
    pub fn best_fitness(&self) -> f64 {
        self.pso.best_fitness
    }
}

/// 評価器を目的関数として最適化し、最良解を復号します
pub fn solve_strategy(
    evaluator: &FitnessEvaluator,
    bounds: &SearchBounds,
    config: PsoConfig,
    seeds: Vec<Vec<f64>>,
    cancel: Option<Arc<AtomicBool>>,
    label: &str,
) -> Result<SolvedStrategy, AllocationError> {
    let mut optimizer = ParticleSwarmOptimizer::new(config, evaluator.layout.bounds(bounds))?.with_seeds(seeds)?;
    if let Some(flag) = cancel {
        optimizer = optimizer.with_cancel_flag(flag);
    }

    let mut progress = TracingProgress::new(label, config.iterations);
    let pso = optimizer.optimize(evaluator, &mut progress);

    let decoded = evaluator.layout.decode(&pso.best_position, &evaluator.physics)?;
    let intervals = evaluator.occlusion_intervals(&decoded.sources);
    Ok(SolvedStrategy {
        pso,
        plans: decoded.plans,
        sources: decoded.sources,
        intervals,
    })
}

/// 1 発のミサイルに対する部分問題の結果
#[derive(Debug, Clone)]
pub struct SubproblemResult {
    pub assignment: Assignment,
    /// 割り当てがない場合は `None`
    pub solution: Option<SolvedStrategy>,
    /// 威脅値の全体に占める割合
    pub weight: f64,
}

impl SubproblemResult {
    pub fn best_fitness(&self) -> f64 {
        self.solution.as_ref().map_or(0.0, SolvedStrategy::best_fitness)
    }
}

/// 任務割り当ての集計結果
#[derive(Debug, Clone)]
pub struct AllocationReport {
    /// 威脅順
    pub subproblems: Vec<SubproblemResult>,
    /// 最良遮蔽時間の単純和
    pub total_occlusion: f64,
    /// 最良遮蔽時間の威脅加重和
    pub weighted_occlusion: f64,
}

/// 威脅値の割合を重みとして求めます
///
/// 威脅値の合計が 0 以下の場合は均等な重みとします。
pub fn threat_shares(threats: &[ThreatAssessment]) -> Vec<f64> {
    let total: f64 = threats.iter().map(|t| t.score).sum();
    if total > 0.0 && total.is_finite() {
        threats.iter().map(|t| t.score / total).collect()
    } else if threats.is_empty() {
        Vec::new()
    } else {
        vec![1.0 / threats.len() as f64; threats.len()]
    }
}

/// 任務割り当てと部分問題の求解
#[derive(Debug, Clone)]
pub struct TaskAllocator<'a> {
    context: &'a ScenarioContext,
    pub uav_counts: Vec<usize>,
    pub canisters_per_uav: usize,
    pub weights: ThreatWeights,
    pub budget: SubproblemBudget,
    cancel: Option<Arc<AtomicBool>>,
    label: String,
}

impl<'a> TaskAllocator<'a> {
    pub fn new(context: &'a ScenarioContext, uav_counts: Vec<usize>, canisters_per_uav: usize) -> Self {
        Self {
            context,
            uav_counts,
            canisters_per_uav,
            weights: ThreatWeights::default(),
            budget: SubproblemBudget::default(),
            cancel: None,
            label: "allocate".to_string(),
        }
    }

    pub fn with_weights(mut self, weights: ThreatWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn with_budget(mut self, budget: SubproblemBudget) -> Self {
        self.budget = budget;
        self
    }

    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// 進行状況ログに付けるタスク名
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn assess(&self) -> Vec<ThreatAssessment> {
        assess_threats(&self.context.missiles, self.context.real_target.center, self.weights)
    }

    pub fn plan(&self) -> Result<Vec<Assignment>, AllocationError> {
        let threats = self.assess();
        for threat in &threats {
            info!(
                missile_id = %threat.missile_id,
                time_to_impact = threat.time_to_impact,
                min_distance = threat.min_distance,
                score = threat.score,
                "威脅評価"
            );
        }
        allocate(&threats, &self.context.missiles, &self.context.uavs, &self.uav_counts)
    }

    /// 部分問題 `index` の乱数シード
    pub fn subproblem_seed(&self, index: usize) -> u64 {
        let mut rng = ChaCha8Rng::seed_from_u64(self.context.optimizer.seed);
        rng.set_stream(index as u64 + 1);
        rng.next_u64()
    }

    fn subproblem_config(&self, index: usize, dimensions: usize) -> PsoConfig {
        let (particles, iterations) = self.budget.sizing(dimensions);
        PsoConfig {
            particles,
            iterations,
            seed: self.subproblem_seed(index),
            stall: None,
            ..self.context.optimizer
        }
    }

    /// 割り当てを決め、全ての部分問題を同時に解いて集計します
    pub fn solve(&self) -> Result<AllocationReport, AllocationError> {
        let assignments = self.plan()?;
        let shares = threat_shares(&assignments.iter().map(|a| a.threat.clone()).collect::<Vec<_>>());

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .thread_name("smokesim-subproblem")
            .build()
            .map_err(AllocationError::Runtime)?;

        let mut handles = Vec::with_capacity(assignments.len());
        for (index, assignment) in assignments.iter().enumerate() {
            if assignment.is_skipped() {
                warn!(missile_id = %assignment.missile_id(), "割り当て可能な無人機がないため部分問題を省略");
                handles.push(None);
                continue;
            }

            let evaluator = self
                .context
                .evaluator(assignment.missile_id(), &assignment.uav_ids, self.canisters_per_uav)?;
            let config = self.subproblem_config(index, evaluator.dimensions());
            let bounds = self.context.bounds;
            let cancel = self.cancel.clone();
            let label = format!("{}/{}", self.label, assignment.missile_id());

            info!(
                missile_id = %assignment.missile_id(),
                uavs = ?assignment.uav_ids,
                dimensions = evaluator.dimensions(),
                particles = config.particles,
                iterations = config.iterations,
                "部分問題を開始"
            );
            let handle = runtime.spawn_blocking(move || solve_strategy(&evaluator, &bounds, config, Vec::new(), cancel, &label));
            handles.push(Some(handle));
        }

        let solutions = runtime.block_on(async {
            let mut solutions = Vec::with_capacity(handles.len());
            for (assignment, handle) in assignments.iter().zip(handles) {
                let solution = match handle {
                    Some(handle) => Some(handle.await.map_err(|e| AllocationError::Join {
                        missile_id: assignment.missile_id().to_string(),
                        message: e.to_string(),
                    })??),
                    None => None,
                };
                solutions.push(solution);
            }
            Ok::<_, AllocationError>(solutions)
        })?;

        let subproblems: Vec<SubproblemResult> = assignments
            .into_iter()
            .zip(solutions)
            .zip(shares)
            .map(|((assignment, solution), weight)| SubproblemResult {
                assignment,
                solution,
                weight,
            })
            .collect();

        let total_occlusion = subproblems.iter().map(SubproblemResult::best_fitness).sum();
        let weighted_occlusion = subproblems.iter().map(|s| s.weight * s.best_fitness()).sum();

        info!(total_occlusion, weighted_occlusion, "全部分問題の求解完了");

        Ok(AllocationReport {
            subproblems,
            total_occlusion,
            weighted_occlusion,
        })
    }
}
