//! # PSO モジュール
//!
//! 軸平行な有界領域上でブラックボックス目的関数を最大化する粒子群最適化です。
//!
//! ## 処理の流れ
//!
//! 1. **初期化**: 各粒子の位置を範囲内で一様に生成し、指定があれば先頭の粒子を
//!    種ベクトルで上書きします。速度は 0 から始めます。
//! 2. **評価**: 全粒子の適応度を求め、自己最良・全体最良を設定します。
//! 3. **更新**: `v = w v + c1 r1 (pbest - x) + c2 r2 (gbest - x)`、`x += v` の後、
//!    位置を成分ごとに範囲へクランプします（速度は補正しません）。
//! 4. 反復回数に達するか、停滞・中断条件を満たすまで 3 を繰り返します。
//!
//! ## 並列化と再現性
//!
//! 1 反復内の粒子の更新と評価は rayon で並列に実行します。各粒子は
//! マスターシードから導出した独立の乱数列を持ち、全体最良の更新は
//! 全粒子の評価完了後に添字順で行うため、実行順序によらず結果は同一です。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, info};

/// 最適化の目的関数
///
/// 評価は失敗しない契約です。失敗は呼び出し側で番兵値へ変換してください。
pub trait Objective: Sync {
    fn evaluate(&self, position: &[f64]) -> f64;
}

impl<F> Objective for F
where
    F: Fn(&[f64]) -> f64 + Sync,
{
    fn evaluate(&self, position: &[f64]) -> f64 {
        self(position)
    }
}

/// 進行状況の通知先
pub trait ProgressSink {
    /// `iteration` 回目の反復終了時の全体最良値を受け取ります
    fn on_progress(&mut self, iteration: usize, best_fitness: f64);
}

/// 何もしない通知先
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn on_progress(&mut self, _iteration: usize, _best_fitness: f64) {}
}

/// tracing へ出力する通知先
#[derive(Debug, Clone)]
pub struct TracingProgress {
    pub label: String,
    pub total_iterations: usize,
}

impl TracingProgress {
    pub fn new(label: impl Into<String>, total_iterations: usize) -> Self {
        Self {
            label: label.into(),
            total_iterations,
        }
    }
}

impl ProgressSink for TracingProgress {
    fn on_progress(&mut self, iteration: usize, best_fitness: f64) {
        info!(
            task = %self.label,
            iteration,
            best_fitness,
            "反復 {}/{}, 現在の最良値: {:.4}",
            iteration,
            self.total_iterations,
            best_fitness
        );
    }
}

impl ProgressSink for Vec<(usize, f64)> {
    fn on_progress(&mut self, iteration: usize, best_fitness: f64) {
        self.push((iteration, best_fitness));
    }
}

/// 停滞判定（早期終了）の条件
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StallCriterion {
    /// この反復回数だけ改善が `tolerance` 以下なら終了
    pub iterations: usize,
    pub tolerance: f64,
}

/// PSO の設定
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PsoConfig {
    /// 粒子数
    pub particles: usize,
    /// 最大反復回数
    pub iterations: usize,
    /// 慣性重み w
    pub inertia: f64,
    /// 認知係数 c1
    pub cognitive: f64,
    /// 社会係数 c2
    pub social: f64,
    /// マスターシード
    pub seed: u64,
    /// 進行状況の通知間隔（反復数、0 で通知しない）
    pub report_every: usize,
    pub stall: Option<StallCriterion>,
}

impl Default for PsoConfig {
    fn default() -> Self {
        Self {
            particles: 50,
            iterations: 200,
            inertia: 0.5,
            cognitive: 1.5,
            social: 1.5,
            seed: 42,
            report_every: 10,
            stall: None,
        }
    }
}

/// 最適化器の設定エラー
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PsoError {
    #[error("探索範囲が空です")]
    EmptyBounds,

    #[error("{dim} 次元目の探索範囲が不正です: [{lo}, {hi}]")]
    InvalidBound { dim: usize, lo: f64, hi: f64 },

    #[error("粒子数が 0 です")]
    NoParticles,

    #[error("係数が有限値ではありません: {name}")]
    NonFiniteCoefficient { name: &'static str },

    #[error("種ベクトルの次元が一致しません: 期待値 {expected}, 実際 {got}")]
    SeedDimension { expected: usize, got: usize },

    #[error("種ベクトルが粒子数を超えています: 粒子数 {particles}, 種 {seeds}")]
    TooManySeeds { particles: usize, seeds: usize },

    #[error("種ベクトルの {index} 番目の要素が有限値ではありません")]
    NonFiniteSeed { index: usize },
}

/// 粒子
#[derive(Debug, Clone)]
pub struct Particle {
    pub position: Vec<f64>,
    pub velocity: Vec<f64>,
    pub fitness: f64,
    pub best_position: Vec<f64>,
    pub best_fitness: f64,
    rng: ChaCha8Rng,
}

/// 群全体の状態
#[derive(Debug, Clone)]
pub struct SwarmState {
    pub particles: Vec<Particle>,
    pub best_position: Vec<f64>,
    pub best_fitness: f64,
    /// 完了した反復回数
    pub iteration: usize,
    /// 目的関数の呼び出し回数
    pub evaluations: usize,
}

/// 終了理由
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Completed,
    Stalled,
    Cancelled,
}

/// 最適化結果
#[derive(Debug, Clone, PartialEq)]
pub struct PsoResult {
    pub best_position: Vec<f64>,
    pub best_fitness: f64,
    pub iterations: usize,
    pub evaluations: usize,
    pub stop_reason: StopReason,
}

/// 粒子群最適化器
#[derive(Debug, Clone)]
pub struct ParticleSwarmOptimizer {
    config: PsoConfig,
    bounds: Vec<(f64, f64)>,
    seeds: Vec<Vec<f64>>,
    cancel: Option<Arc<AtomicBool>>,
}

impl ParticleSwarmOptimizer {
    /// 設定と探索範囲から最適化器を作成します
    ///
    /// # 戻り値
    ///
    /// 範囲が空・逆転・非有限、粒子数 0、係数が非有限の場合は `PsoError`
    pub fn new(config: PsoConfig, bounds: Vec<(f64, f64)>) -> Result<Self, PsoError> {
        if bounds.is_empty() {
            return Err(PsoError::EmptyBounds);
        }
        for (dim, &(lo, hi)) in bounds.iter().enumerate() {
            if !lo.is_finite() || !hi.is_finite() || lo > hi {
                return Err(PsoError::InvalidBound { dim, lo, hi });
            }
        }
        if config.particles == 0 {
            return Err(PsoError::NoParticles);
        }
        for (name, value) in [
            ("inertia", config.inertia),
            ("cognitive", config.cognitive),
            ("social", config.social),
        ] {
            if !value.is_finite() {
                return Err(PsoError::NonFiniteCoefficient { name });
            }
        }
        Ok(Self {
            config,
            bounds,
            seeds: Vec::new(),
            cancel: None,
        })
    }

    /// 先頭の粒子を上書きする種ベクトルを設定します
    ///
    /// 範囲外の成分はクランプされます。
    pub fn with_seeds(mut self, seeds: Vec<Vec<f64>>) -> Result<Self, PsoError> {
        if seeds.len() > self.config.particles {
            return Err(PsoError::TooManySeeds {
                particles: self.config.particles,
                seeds: seeds.len(),
            });
        }
        for seed in &seeds {
            if seed.len() != self.bounds.len() {
                return Err(PsoError::SeedDimension {
                    expected: self.bounds.len(),
                    got: seed.len(),
                });
            }
            if let Some(index) = seed.iter().position(|v| !v.is_finite()) {
                return Err(PsoError::NonFiniteSeed { index });
            }
        }
        self.seeds = seeds.into_iter().map(|s| self.clamp(s)).collect();
        Ok(self)
    }

    /// 反復の合間に確認される中断フラグを設定します
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn dimensions(&self) -> usize {
        self.bounds.len()
    }

    fn clamp(&self, mut position: Vec<f64>) -> Vec<f64> {
        for (value, &(lo, hi)) in position.iter_mut().zip(&self.bounds) {
            *value = value.clamp(lo, hi);
        }
        position
    }

    /// 粒子群を生成し、初期評価まで行います
    pub fn initialize<O: Objective + ?Sized>(&self, objective: &O) -> SwarmState {
        let mut master = ChaCha8Rng::seed_from_u64(self.config.seed);
        let dim = self.dimensions();

        let mut particles: Vec<Particle> = (0..self.config.particles)
            .map(|index| {
                let sampled: Vec<f64> = self.bounds.iter().map(|&(lo, hi)| master.gen_range(lo..=hi)).collect();
                let position = self.seeds.get(index).cloned().unwrap_or(sampled);
                Particle {
                    best_position: position.clone(),
                    position,
                    velocity: vec![0.0; dim],
                    fitness: f64::NEG_INFINITY,
                    best_fitness: f64::NEG_INFINITY,
                    rng: ChaCha8Rng::seed_from_u64(master.next_u64()),
                }
            })
            .collect();

        particles.par_iter_mut().for_each(|particle| {
            let fitness = sanitize(objective.evaluate(&particle.position));
            particle.fitness = fitness;
            particle.best_fitness = fitness;
        });

        let (best_position, best_fitness) = best_of(&particles);
        debug!(
            particles = particles.len(),
            dimensions = dim,
            seeds = self.seeds.len(),
            best_fitness,
            "粒子群の初期化完了"
        );

        SwarmState {
            evaluations: particles.len(),
            particles,
            best_position,
            best_fitness,
            iteration: 0,
        }
    }

    /// 1 反復分の更新と評価を行います
    pub fn step<O: Objective + ?Sized>(&self, state: &mut SwarmState, objective: &O) {
        let PsoConfig {
            inertia, cognitive, social, ..
        } = self.config;
        let global_best = &state.best_position;
        let bounds = &self.bounds;

        state.particles.par_iter_mut().for_each(|particle| {
            let dim = bounds.len();
            let r1: Vec<f64> = (0..dim).map(|_| particle.rng.gen_range(0.0..1.0)).collect();
            let r2: Vec<f64> = (0..dim).map(|_| particle.rng.gen_range(0.0..1.0)).collect();

            for d in 0..dim {
                let x = particle.position[d];
                particle.velocity[d] = inertia * particle.velocity[d]
                    + cognitive * r1[d] * (particle.best_position[d] - x)
                    + social * r2[d] * (global_best[d] - x);
                let (lo, hi) = bounds[d];
                particle.position[d] = (x + particle.velocity[d]).clamp(lo, hi);
            }

            let fitness = sanitize(objective.evaluate(&particle.position));
            particle.fitness = fitness;
            if fitness > particle.best_fitness {
                particle.best_fitness = fitness;
                particle.best_position.clone_from(&particle.position);
            }
        });

        // 全粒子の評価完了後に添字順で全体最良を更新
        for particle in &state.particles {
            if particle.best_fitness > state.best_fitness {
                state.best_fitness = particle.best_fitness;
                state.best_position.clone_from(&particle.best_position);
            }
        }
        state.iteration += 1;
        state.evaluations += state.particles.len();
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    /// 最適化を実行します
    ///
    /// # 引数
    ///
    /// * `objective` - 最大化する目的関数
    /// * `progress` - `report_every` 反復ごとに全体最良値を受け取る通知先
    ///
    /// # 戻り値
    ///
    /// 全体最良の位置と適応度。中断・停滞した場合もその時点の最良値を返します。
    pub fn optimize<O: Objective + ?Sized>(&self, objective: &O, progress: &mut dyn ProgressSink) -> PsoResult {
        let mut state = self.initialize(objective);
        let mut stop_reason = StopReason::Completed;
        let mut stall_reference = state.best_fitness;
        let mut stall_count = 0usize;

        while state.iteration < self.config.iterations {
            if self.is_cancelled() {
                stop_reason = StopReason::Cancelled;
                break;
            }

            self.step(&mut state, objective);

            if self.config.report_every > 0 && state.iteration % self.config.report_every == 0 {
                progress.on_progress(state.iteration, state.best_fitness);
            }

            if let Some(stall) = self.config.stall {
                if state.best_fitness > stall_reference + stall.tolerance {
                    stall_reference = state.best_fitness;
                    stall_count = 0;
                } else {
                    stall_count += 1;
                    if stall_count >= stall.iterations {
                        stop_reason = StopReason::Stalled;
                        break;
                    }
                }
            }
        }

        debug!(
            iterations = state.iteration,
            evaluations = state.evaluations,
            best_fitness = state.best_fitness,
            stop_reason = ?stop_reason,
            "粒子群最適化の終了"
        );

        PsoResult {
            best_position: state.best_position,
            best_fitness: state.best_fitness,
            iterations: state.iteration,
            evaluations: state.evaluations,
            stop_reason,
        }
    }
}

/// 関数形式の呼び出し口
///
/// `(最良位置, 最良適応度)` を返します。
#[allow(clippy::too_many_arguments)]
pub fn optimize<O: Objective + ?Sized>(
    objective: &O,
    bounds: &[(f64, f64)],
    particles: usize,
    iterations: usize,
    inertia: f64,
    cognitive: f64,
    social: f64,
    seeds: Option<Vec<Vec<f64>>>,
) -> Result<(Vec<f64>, f64), PsoError> {
    let config = PsoConfig {
        particles,
        iterations,
        inertia,
        cognitive,
        social,
        ..PsoConfig::default()
    };
    let optimizer = ParticleSwarmOptimizer::new(config, bounds.to_vec())?.with_seeds(seeds.unwrap_or_default())?;
    let result = optimizer.optimize(objective, &mut NullProgress);
    Ok((result.best_position, result.best_fitness))
}

fn sanitize(fitness: f64) -> f64 {
    if fitness.is_nan() { f64::NEG_INFINITY } else { fitness }
}

/// 自己最良の中から最大のもの（同値なら添字の小さいもの）
fn best_of(particles: &[Particle]) -> (Vec<f64>, f64) {
    let mut best = &particles[0];
    for particle in &particles[1..] {
        if particle.best_fitness > best.best_fitness {
            best = particle;
        }
    }
    (best.best_position.clone(), best.best_fitness)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sphere(x: &[f64]) -> f64 {
        let target = [3.0, -1.0, 0.5];
        -x.iter().zip(target).map(|(a, b)| (a - b).powi(2)).sum::<f64>()
    }

    fn config(particles: usize, iterations: usize, seed: u64) -> PsoConfig {
        PsoConfig {
            particles,
            iterations,
            seed,
            report_every: 0,
            ..PsoConfig::default()
        }
    }

    fn bounds() -> Vec<(f64, f64)> {
        vec![(-10.0, 10.0); 3]
    }

    #[test]
    fn test_invalid_configuration() {
        assert_eq!(
            ParticleSwarmOptimizer::new(config(10, 10, 1), vec![]).unwrap_err(),
            PsoError::EmptyBounds
        );
        assert!(matches!(
            ParticleSwarmOptimizer::new(config(10, 10, 1), vec![(1.0, 0.0)]),
            Err(PsoError::InvalidBound { dim: 0, .. })
        ));
        assert!(matches!(
            ParticleSwarmOptimizer::new(config(10, 10, 1), vec![(0.0, f64::INFINITY)]),
            Err(PsoError::InvalidBound { .. })
        ));
        assert_eq!(
            ParticleSwarmOptimizer::new(config(0, 10, 1), bounds()).unwrap_err(),
            PsoError::NoParticles
        );
        let optimizer = ParticleSwarmOptimizer::new(config(2, 10, 1), bounds()).unwrap();
        assert!(matches!(
            optimizer.clone().with_seeds(vec![vec![0.0; 2]]),
            Err(PsoError::SeedDimension { expected: 3, got: 2 })
        ));
        assert!(matches!(
            optimizer.with_seeds(vec![vec![0.0; 3]; 3]),
            Err(PsoError::TooManySeeds { .. })
        ));
    }

    #[test]
    fn test_converges_on_unimodal_objective() {
        let optimizer = ParticleSwarmOptimizer::new(config(30, 150, 7), bounds()).unwrap();
        let result = optimizer.optimize(&sphere, &mut NullProgress);
        assert!(result.best_fitness > -1e-4, "best = {}", result.best_fitness);
        assert!((result.best_position[0] - 3.0).abs() < 1e-2);
        assert!((result.best_position[1] + 1.0).abs() < 1e-2);
        assert_eq!(result.stop_reason, StopReason::Completed);
        assert_eq!(result.iterations, 150);
        assert_eq!(result.evaluations, 30 * 151);
    }

    #[test]
    fn test_seeded_optimum_is_kept() {
        let unseeded = ParticleSwarmOptimizer::new(config(10, 20, 3), bounds())
            .unwrap()
            .optimize(&sphere, &mut NullProgress);
        let seeded = ParticleSwarmOptimizer::new(config(10, 20, 3), bounds())
            .unwrap()
            .with_seeds(vec![vec![3.0, -1.0, 0.5]])
            .unwrap()
            .optimize(&sphere, &mut NullProgress);
        assert_eq!(seeded.best_fitness, 0.0);
        assert!(seeded.best_fitness >= unseeded.best_fitness);
    }

    #[test]
    fn test_seed_is_clamped() {
        let optimizer = ParticleSwarmOptimizer::new(config(4, 0, 3), bounds())
            .unwrap()
            .with_seeds(vec![vec![50.0, -50.0, 0.0]])
            .unwrap();
        let state = optimizer.initialize(&sphere);
        assert_eq!(state.particles[0].position, vec![10.0, -10.0, 0.0]);
    }

    #[test]
    fn test_positions_stay_in_bounds() {
        let bounds = vec![(0.0, 1.0), (-5.0, -4.0), (100.0, 100.5)];
        let optimizer = ParticleSwarmOptimizer::new(
            PsoConfig {
                inertia: 1.2,
                cognitive: 2.5,
                social: 2.5,
                ..config(20, 0, 11)
            },
            bounds.clone(),
        )
        .unwrap();
        // 範囲外に最適値を持つ目的関数で、粒子を境界へ押し付ける
        let objective = |x: &[f64]| x[0] * 10.0 - x[1] * 3.0 + x[2];
        let mut state = optimizer.initialize(&objective);
        for _ in 0..50 {
            optimizer.step(&mut state, &objective);
            for particle in &state.particles {
                for (value, (lo, hi)) in particle.position.iter().zip(&bounds) {
                    assert!(value >= lo && value <= hi);
                }
            }
        }
        assert_eq!(state.iteration, 50);
    }

    #[test]
    fn test_deterministic_under_fixed_seed() {
        let run = || {
            ParticleSwarmOptimizer::new(config(16, 40, 99), bounds())
                .unwrap()
                .optimize(&sphere, &mut NullProgress)
        };
        let first = run();
        let second = run();
        assert_eq!(first, second);
        assert_eq!(first.best_fitness.to_bits(), second.best_fitness.to_bits());
    }

    #[test]
    fn test_global_best_is_monotonic() {
        let optimizer = ParticleSwarmOptimizer::new(
            PsoConfig {
                report_every: 1,
                ..config(8, 30, 5)
            },
            bounds(),
        )
        .unwrap();
        let mut history: Vec<(usize, f64)> = Vec::new();
        optimizer.optimize(&sphere, &mut history);
        assert_eq!(history.len(), 30);
        assert_eq!(history[0].0, 1);
        assert!(history.windows(2).all(|w| w[1].1 >= w[0].1));
    }

    #[test]
    fn test_progress_every_k_iterations() {
        let optimizer = ParticleSwarmOptimizer::new(
            PsoConfig {
                report_every: 10,
                ..config(5, 35, 5)
            },
            bounds(),
        )
        .unwrap();
        let mut history: Vec<(usize, f64)> = Vec::new();
        optimizer.optimize(&sphere, &mut history);
        let iterations: Vec<usize> = history.iter().map(|(i, _)| *i).collect();
        assert_eq!(iterations, vec![10, 20, 30]);
    }

    #[test]
    fn test_cancelled_before_first_iteration() {
        let flag = Arc::new(AtomicBool::new(true));
        let result = ParticleSwarmOptimizer::new(config(6, 100, 1), bounds())
            .unwrap()
            .with_cancel_flag(flag)
            .optimize(&sphere, &mut NullProgress);
        assert_eq!(result.stop_reason, StopReason::Cancelled);
        assert_eq!(result.iterations, 0);
        assert_eq!(result.best_position.len(), 3);
        assert!(result.best_fitness.is_finite());
    }

    #[test]
    fn test_stall_stops_early() {
        let optimizer = ParticleSwarmOptimizer::new(
            PsoConfig {
                stall: Some(StallCriterion {
                    iterations: 5,
                    tolerance: 0.0,
                }),
                ..config(6, 100, 1)
            },
            bounds(),
        )
        .unwrap();
        let result = optimizer.optimize(&|_: &[f64]| 1.0, &mut NullProgress);
        assert_eq!(result.stop_reason, StopReason::Stalled);
        assert_eq!(result.iterations, 5);
    }

    #[test]
    fn test_nan_objective_never_wins() {
        let objective = |x: &[f64]| if x[0] > 0.0 { f64::NAN } else { x[0] };
        let result = ParticleSwarmOptimizer::new(config(10, 10, 2), bounds())
            .unwrap()
            .optimize(&objective, &mut NullProgress);
        assert!(!result.best_fitness.is_nan());
    }

    #[test]
    fn test_functional_interface() {
        let (position, fitness) = optimize(&sphere, &bounds(), 20, 60, 0.5, 1.5, 1.5, None).unwrap();
        assert_eq!(position.len(), 3);
        assert!(fitness > -1e-2);
    }
}
