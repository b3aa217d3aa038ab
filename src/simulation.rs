//! # Simulation モジュール
//!
//! シナリオに記述されたタスクを順に実行するエンジンを提供します。
//!
//! ## 主要機能
//!
//! - **初期化**: シナリオを不変な実行時設定 `ScenarioContext` に変換し、
//!   幾何学的な設定誤りを最適化開始前に報告
//! - **固定戦略評価**: 与えられた投下計画の遮蔽時間と遮蔽区間を算出
//! - **戦略最適化**: 1 発のミサイルに対する編隊の戦略を粒子群最適化で探索
//! - **任務割り当て**: 複数ミサイルへの無人機の割り当てと部分問題の求解
//! - **軌跡出力**: 描画用の時系列を任意で生成
//!
//! ## 使用例
//!
//! ```rust,no_run
//! use smokesim::scenario::ScenarioConfig;
//! use smokesim::simulation::SimulationEngine;
//!
//! let config = ScenarioConfig::from_file("scenarios/single_release.yaml")?;
//! let mut engine = SimulationEngine::new(config, 1);
//! engine.initialize()?;
//! engine.run()?;
//! for report in engine.reports() {
//!     report.print_summary();
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Instant;

use tracing::{debug, info};

use crate::allocation::{AllocationReport, SolvedStrategy, TaskAllocator, ThreatWeights, SubproblemBudget, solve_strategy};
use crate::context::{ScenarioContext, pso_config};
use crate::fitness::{DecodedStrategy, FitnessEvaluator, SmokeSource, UavPlan};
use crate::models::UavTrack;
use crate::scenario::{FixedPlanConfig, ScenarioConfig, TaskConfig};
use crate::trace::{TargetShape, TrajectoryTrace};

/// 固定戦略評価の結果
#[derive(Debug, Clone)]
pub struct EvaluationReport {
    pub task: String,
    pub missile_id: String,
    pub plans: Vec<UavPlan>,
    /// 全機の弾数が揃っている場合の戦略ベクトル（最適化の種に使えます）
    pub strategy: Option<Vec<f64>>,
    pub sources: Vec<SmokeSource>,
    pub occlusion_time: f64,
    pub intervals: Vec<(f64, f64)>,
}

/// 戦略最適化の結果
#[derive(Debug, Clone)]
pub struct OptimizationReport {
    pub task: String,
    pub missile_id: String,
    pub uav_ids: Vec<String>,
    pub solution: SolvedStrategy,
}

/// 任務割り当ての結果
#[derive(Debug, Clone)]
pub struct AllocationTaskReport {
    pub task: String,
    pub report: AllocationReport,
}

/// タスク 1 件分の結果
#[derive(Debug, Clone)]
pub enum TaskReport {
    Evaluate(EvaluationReport),
    Optimize(OptimizationReport),
    Allocate(AllocationTaskReport),
}

impl TaskReport {
    pub fn task(&self) -> &str {
        match self {
            TaskReport::Evaluate(r) => &r.task,
            TaskReport::Optimize(r) => &r.task,
            TaskReport::Allocate(r) => &r.task,
        }
    }

    /// タスクの主要指標（遮蔽時間の合計、秒）
    pub fn headline(&self) -> f64 {
        match self {
            TaskReport::Evaluate(r) => r.occlusion_time,
            TaskReport::Optimize(r) => r.solution.best_fitness(),
            TaskReport::Allocate(r) => r.report.total_occlusion,
        }
    }

    /// 結果を表示
    pub fn print_summary(&self) {
        println!("=== タスク結果: {} ===", self.task());
        match self {
            TaskReport::Evaluate(r) => {
                println!("対象ミサイル: {}", r.missile_id);
                print_plans(&r.plans);
                if let Some(strategy) = &r.strategy {
                    println!("戦略ベクトル: {:?}", strategy);
                }
                print_sources(&r.sources);
                println!("有効遮蔽時間: {:.4}秒", r.occlusion_time);
                print_intervals(&r.intervals);
            }
            TaskReport::Optimize(r) => {
                println!("対象ミサイル: {} / 無人機: {:?}", r.missile_id, r.uav_ids);
                print_solution(&r.solution);
            }
            TaskReport::Allocate(r) => {
                for sub in &r.report.subproblems {
                    let threat = &sub.assignment.threat;
                    println!(
                        "--- {} (威脅値: {:.6}, 着弾予想: {:.2}秒, 最小接近距離: {:.2}m, 重み: {:.3}) ---",
                        threat.missile_id, threat.score, threat.time_to_impact, threat.min_distance, sub.weight
                    );
                    match &sub.solution {
                        Some(solution) => {
                            println!("無人機: {:?}", sub.assignment.uav_ids);
                            print_solution(solution);
                        }
                        None => println!("割り当てなし"),
                    }
                }
                println!("指標一 (単純和): {:.4}秒", r.report.total_occlusion);
                println!("指標二 (威脅加重和): {:.4}秒", r.report.weighted_occlusion);
            }
        }
        println!();
    }
}

fn print_plans(plans: &[UavPlan]) {
    for plan in plans {
        let releases: Vec<String> = plan.release_times.iter().map(|t| format!("{:.2}", t)).collect();
        println!(
            "  {}: 速さ {:.2}m/s, 方位 {:.2}度, 投下時刻 [{}]秒, 引信遅延 {:.2}秒",
            plan.uav_id,
            plan.speed,
            plan.heading_deg,
            releases.join(", "),
            plan.fuse_delay
        );
    }
}

fn print_sources(sources: &[SmokeSource]) {
    for (index, source) in sources.iter().enumerate() {
        println!(
            "  煙幕弾 {}: 投下 {:.2}秒 {} → 起爆 {:.2}秒 {}",
            index + 1,
            source.release_time,
            source.release_position,
            source.detonation_time,
            source.detonation_position
        );
    }
}

fn print_intervals(intervals: &[(f64, f64)]) {
    for (start, end) in intervals {
        println!("  遮蔽区間: [{:.2}, {:.2})秒", start, end);
    }
}

fn print_solution(solution: &SolvedStrategy) {
    print_plans(&solution.plans);
    print_sources(&solution.sources);
    println!(
        "最良遮蔽時間: {:.4}秒 (反復 {}, 評価 {}回, 終了理由 {:?})",
        solution.best_fitness(),
        solution.pso.iterations,
        solution.pso.evaluations,
        solution.pso.stop_reason
    );
    print_intervals(&solution.intervals);
}

pub struct SimulationEngine {
    pub scenario_config: ScenarioConfig,
    pub verbose_level: u8,
    /// 指定時はこの名前のタスクのみ実行
    pub task_filter: Option<String>,
    /// 指定時は描画用の軌跡をこの刻みで生成
    pub render_dt: Option<f64>,

    context: Option<ScenarioContext>,
    cancel: Arc<AtomicBool>,
    reports: Vec<TaskReport>,
    traces: Vec<TrajectoryTrace>,
}

impl SimulationEngine {
    pub fn new(scenario: ScenarioConfig, verbose_level: u8) -> Self {
        Self {
            scenario_config: scenario,
            verbose_level,
            task_filter: None,
            render_dt: None,
            context: None,
            cancel: Arc::new(AtomicBool::new(false)),
            reports: Vec::new(),
            traces: Vec::new(),
        }
    }

    /// マスターシードを上書き
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.scenario_config.sim.seed = seed;
        self
    }

    pub fn with_task_filter(mut self, task: impl Into<String>) -> Self {
        self.task_filter = Some(task.into());
        self
    }

    pub fn with_trace(mut self, render_dt: f64) -> Self {
        self.render_dt = Some(render_dt);
        self
    }

    /// 実行中の最適化を反復の合間に中断するためのフラグ
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn reports(&self) -> &[TaskReport] {
        &self.reports
    }

    pub fn traces(&self) -> &[TrajectoryTrace] {
        &self.traces
    }

    pub fn initialize(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        if self.verbose_level > 0 {
            info!("シミュレーションエンジンを初期化中...");
        }

        if let Some(name) = &self.task_filter {
            if !self.scenario_config.tasks.iter().any(|t| t.name() == name) {
                return Err(format!("タスク {} はシナリオに定義されていません", name).into());
            }
        }

        let context = ScenarioContext::from_config(&self.scenario_config)?;

        if self.verbose_level > 0 {
            info!("初期化完了:");
            info!("  ミサイル: {}発", context.missiles.len());
            info!("  無人機: {}機", context.uavs.len());
            info!("  時間刻み: {:.3}秒 ({}ステップ)", context.grid.dt, context.grid.steps);
        }
        if self.verbose_level > 1 {
            for missile in &context.missiles {
                debug!(
                    missile_id = %missile.id,
                    time_to_impact = missile.time_to_impact(),
                    "ミサイル初期化"
                );
            }
        }

        self.context = Some(context);
        Ok(())
    }

    pub fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        let context = self
            .context
            .take()
            .ok_or("シミュレーションエンジンが初期化されていません")?;
        let result = self.run_tasks(&context);
        self.context = Some(context);
        result
    }

    fn run_tasks(&mut self, context: &ScenarioContext) -> Result<(), Box<dyn std::error::Error>> {
        info!("=== シミュレーション実行開始 ===");
        let started = Instant::now();

        let tasks: Vec<TaskConfig> = self
            .scenario_config
            .tasks
            .iter()
            .filter(|t| self.task_filter.as_deref().is_none_or(|name| t.name() == name))
            .cloned()
            .collect();

        for task in &tasks {
            info!(task = %task.name(), "タスク開始");
            let task_started = Instant::now();

            let report = match task {
                TaskConfig::Evaluate { name, missile, plans } => {
                    TaskReport::Evaluate(self.run_evaluate(context, name, missile, plans)?)
                }
                TaskConfig::Optimize {
                    name,
                    missile,
                    uavs,
                    canisters_per_uav,
                    seeds,
                    rendezvous,
                    optimizer,
                } => {
                    let evaluator = context.evaluator(missile, uavs, *canisters_per_uav)?;
                    let config = optimizer
                        .as_ref()
                        .map(|o| pso_config(o, context.optimizer.seed))
                        .unwrap_or(context.optimizer);

                    let mut seeds = seeds.clone();
                    if let Some(r) = rendezvous {
                        seeds.push(evaluator.layout.rendezvous_seed(r.point.into(), r.fuse_delay_s, &context.bounds));
                    }

                    let solution =
                        solve_strategy(&evaluator, &context.bounds, config, seeds, Some(self.cancel_flag()), name)?;
                    self.record_trace(context, name, &evaluator, &solution.pso.best_position)?;

                    TaskReport::Optimize(OptimizationReport {
                        task: name.clone(),
                        missile_id: missile.clone(),
                        uav_ids: uavs.clone(),
                        solution,
                    })
                }
                TaskConfig::Allocate {
                    name,
                    uav_counts,
                    canisters_per_uav,
                    threat_weights,
                    budget,
                } => {
                    let report = TaskAllocator::new(context, uav_counts.clone(), *canisters_per_uav)
                        .with_weights(ThreatWeights {
                            time_to_impact: threat_weights.time_to_impact,
                            min_distance: threat_weights.min_distance,
                        })
                        .with_budget(SubproblemBudget {
                            particles_per_dim: budget.particles_per_dim,
                            iterations_per_dim: budget.iterations_per_dim,
                            min_iterations: budget.min_iterations,
                            small_dim_threshold: budget.small_dim_threshold,
                        })
                        .with_cancel_flag(self.cancel_flag())
                        .with_label(name.clone())
                        .solve()?;

                    for sub in &report.subproblems {
                        if let Some(solution) = &sub.solution {
                            let evaluator =
                                context.evaluator(sub.assignment.missile_id(), &sub.assignment.uav_ids, *canisters_per_uav)?;
                            let label = format!("{}/{}", name, sub.assignment.missile_id());
                            self.record_trace(context, &label, &evaluator, &solution.pso.best_position)?;
                        }
                    }

                    TaskReport::Allocate(AllocationTaskReport {
                        task: name.clone(),
                        report,
                    })
                }
            };

            info!(
                task = %report.task(),
                occlusion_s = report.headline(),
                elapsed_s = task_started.elapsed().as_secs_f64(),
                "タスク完了"
            );
            self.reports.push(report);
        }

        info!("=== シミュレーション完了 ===");
        info!("実行タスク数: {}", self.reports.len());
        info!("実行時間: {:.2}秒", started.elapsed().as_secs_f64());

        Ok(())
    }

    fn run_evaluate(
        &mut self,
        context: &ScenarioContext,
        name: &str,
        missile_id: &str,
        plans: &[FixedPlanConfig],
    ) -> Result<EvaluationReport, Box<dyn std::error::Error>> {
        let uav_ids: Vec<&str> = plans.iter().map(|p| p.uav.as_str()).collect();
        let canisters = plans.iter().map(|p| p.release_s.len()).max().unwrap_or(1);
        let evaluator = context.evaluator(missile_id, &uav_ids, canisters)?;

        let mut decoded = DecodedStrategy {
            plans: Vec::with_capacity(plans.len()),
            tracks: Vec::with_capacity(plans.len()),
            sources: Vec::new(),
        };
        for plan in plans {
            let slot = context.uav(&plan.uav)?;
            let track = UavTrack::from_speed_heading(slot.id.clone(), slot.start, plan.speed_mps, plan.heading_deg);
            for &release in &plan.release_s {
                decoded
                    .sources
                    .push(SmokeSource::from_release(&track, release, plan.fuse_delay_s, &context.physics));
            }
            decoded.plans.push(UavPlan {
                uav_id: slot.id.clone(),
                speed: plan.speed_mps,
                heading_deg: plan.heading_deg,
                release_times: plan.release_s.clone(),
                fuse_delay: plan.fuse_delay_s,
            });
            decoded.tracks.push(track);
        }

        let strategy = evaluator.layout.encode(&decoded.plans).ok();
        let occlusion_time = evaluator.occlusion_time(&decoded.sources);
        let intervals = evaluator.occlusion_intervals(&decoded.sources);

        if let Some(render_dt) = self.render_dt {
            self.traces.push(
                TrajectoryTrace::from_strategy(name, &evaluator, &decoded, render_dt).with_target(target_shape(context)),
            );
        }

        Ok(EvaluationReport {
            task: name.to_string(),
            missile_id: missile_id.to_string(),
            plans: decoded.plans,
            strategy,
            sources: decoded.sources,
            occlusion_time,
            intervals,
        })
    }

    fn record_trace(
        &mut self,
        context: &ScenarioContext,
        name: &str,
        evaluator: &FitnessEvaluator,
        best_position: &[f64],
    ) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(render_dt) = self.render_dt {
            let decoded = evaluator.layout.decode(best_position, &evaluator.physics)?;
            self.traces.push(
                TrajectoryTrace::from_strategy(name, evaluator, &decoded, render_dt).with_target(target_shape(context)),
            );
        }
        Ok(())
    }
}

fn target_shape(context: &ScenarioContext) -> TargetShape {
    TargetShape {
        center: context.real_target.center,
        radius_m: context.real_target.radius,
        height_m: context.real_target.height,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::tests::SAMPLE;
    use crate::trace::PathKind;

    fn engine() -> SimulationEngine {
        SimulationEngine::new(ScenarioConfig::from_yaml_str(SAMPLE).unwrap(), 0)
    }

    #[test]
    fn test_run_before_initialize_fails() {
        let mut engine = engine();
        assert!(engine.run().is_err());
    }

    #[test]
    fn test_unknown_task_filter() {
        let mut engine = engine().with_task_filter("missing");
        assert!(engine.initialize().is_err());
    }

    #[test]
    fn test_fixed_evaluation_task() {
        let mut engine = engine().with_task_filter("fixed").with_trace(0.5);
        engine.initialize().unwrap();
        engine.run().unwrap();

        assert_eq!(engine.reports().len(), 1);
        let TaskReport::Evaluate(report) = &engine.reports()[0] else {
            panic!("unexpected report");
        };
        assert!(report.occlusion_time > 1.0 && report.occlusion_time < 2.0);
        assert_eq!(report.sources.len(), 1);
        assert_eq!(report.strategy, Some(vec![120.0, 180.0, 1.5, 3.6]));
        assert!((report.sources[0].detonation_time - 5.1).abs() < 1e-12);
        let covered: f64 = report.intervals.iter().map(|(s, e)| e - s).sum();
        assert!((covered - report.occlusion_time).abs() < 1e-9);

        assert_eq!(engine.traces().len(), 1);
        assert_eq!(engine.traces()[0].paths_of(PathKind::Cloud).count(), 1);
        assert!(engine.traces()[0].target.is_some());
    }

    #[test]
    fn test_all_tasks_end_to_end() {
        let mut engine = engine().with_seed(11);
        engine.initialize().unwrap();
        engine.run().unwrap();

        let names: Vec<&str> = engine.reports().iter().map(TaskReport::task).collect();
        assert_eq!(names, vec!["fixed", "single", "team"]);

        // 固定戦略を種として与えた最適化は、その値を下回らない
        let fixed = engine.reports()[0].headline();
        let optimized = engine.reports()[1].headline();
        assert!(optimized >= fixed);

        let TaskReport::Allocate(team) = &engine.reports()[2] else {
            panic!("unexpected report");
        };
        assert_eq!(team.report.subproblems.len(), 2);
        assert!(engine.traces().is_empty());
    }

    #[test]
    fn test_seed_override_is_reproducible() {
        let run = |seed: u64| {
            let mut engine = engine().with_task_filter("single").with_seed(seed);
            engine.initialize().unwrap();
            engine.run().unwrap();
            engine.reports()[0].headline()
        };
        assert_eq!(run(3).to_bits(), run(3).to_bits());
    }
}
