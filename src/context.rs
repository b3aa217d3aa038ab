//! # Context モジュール
//!
//! YAML シナリオを実行時の不変な設定 `ScenarioContext` に変換します。
//!
//! 構築は実行開始時に 1 度だけ行い、ミサイルの方向ベクトルの縮退などの
//! 幾何学的な設定誤りはこの段階でエラーとして報告します。以降は全ての
//! 評価器・最適化器から参照のみで共有されます。

use thiserror::Error;

use crate::fitness::{FitnessEvaluator, SearchBounds, StrategyLayout, TimeGrid, UavSlot};
use crate::models::{Acceleration3D, MissileTrack, ModelError, PhysicsModel, Position3D, Velocity3D};
use crate::pso::{PsoConfig, StallCriterion};
use crate::scenario::{self, OptimizerConfig, ScenarioConfig};

impl From<scenario::Position3D> for Position3D {
    fn from(p: scenario::Position3D) -> Self {
        Position3D::new(p.x_m, p.y_m, p.z_m)
    }
}

impl From<scenario::Vector3> for Velocity3D {
    fn from(v: scenario::Vector3) -> Self {
        Velocity3D::new(v.x, v.y, v.z)
    }
}

impl From<scenario::Vector3> for Acceleration3D {
    fn from(v: scenario::Vector3) -> Self {
        Acceleration3D::new(v.x, v.y, v.z)
    }
}

/// 実行時設定の構築・参照エラー
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ContextError {
    #[error("ミサイル {id} の設定が不正です: {source}")]
    Missile {
        id: String,
        #[source]
        source: ModelError,
    },

    #[error("未定義のミサイルです: {0}")]
    UnknownMissile(String),

    #[error("未定義の無人機です: {0}")]
    UnknownUav(String),
}

/// 保護対象（円柱）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RealTarget {
    pub center: Position3D,
    pub radius: f64,
    pub height: f64,
}

/// 不変な実行時設定
#[derive(Debug, Clone)]
pub struct ScenarioContext {
    pub physics: PhysicsModel,
    pub grid: TimeGrid,
    pub fake_target: Position3D,
    pub real_target: RealTarget,
    /// 定義順
    pub missiles: Vec<MissileTrack>,
    /// 定義順
    pub uavs: Vec<UavSlot>,
    pub bounds: SearchBounds,
    pub optimizer: PsoConfig,
}

impl ScenarioContext {
    /// 検証済みのシナリオから実行時設定を構築します
    ///
    /// # 戻り値
    ///
    /// ミサイルの発射点と照準点が一致する、速さが不正などの場合は `ContextError::Missile`
    pub fn from_config(config: &ScenarioConfig) -> Result<Self, ContextError> {
        let fake_target: Position3D = config.targets.fake.into();

        let missiles = config
            .missiles
            .iter()
            .map(|m| {
                let aim = m.aim.map(Position3D::from).unwrap_or(fake_target);
                MissileTrack::new(m.id.clone(), m.pos.into(), aim, m.speed_mps).map_err(|source| {
                    ContextError::Missile {
                        id: m.id.clone(),
                        source,
                    }
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let uavs = config
            .uavs
            .iter()
            .map(|u| UavSlot {
                id: u.id.clone(),
                start: u.pos.into(),
            })
            .collect();

        let b = &config.bounds;
        let bounds = SearchBounds {
            speed: (b.speed_mps[0], b.speed_mps[1]),
            heading_deg: (b.heading_deg[0], b.heading_deg[1]),
            release: (b.release_s[0], b.release_s[1]),
            release_gap: (b.release_gap_s[0], b.release_gap_s[1]),
            fuse_delay: (b.fuse_delay_s[0], b.fuse_delay_s[1]),
        };

        let real = &config.targets.real;

        Ok(Self {
            physics: PhysicsModel {
                gravity: config.physics.gravity_mps2.into(),
                cloud_sink: config.physics.cloud_sink_mps.into(),
                smoke_radius: config.physics.smoke_radius_m,
                smoke_lifespan: config.physics.smoke_lifespan_s,
            },
            grid: TimeGrid::new(config.sim.dt_s, config.sim.t_max_s),
            fake_target,
            real_target: RealTarget {
                center: real.center.into(),
                radius: real.radius_m,
                height: real.height_m,
            },
            missiles,
            uavs,
            bounds,
            optimizer: pso_config(&config.optimizer, config.sim.seed),
        })
    }

    pub fn missile(&self, id: &str) -> Result<&MissileTrack, ContextError> {
        self.missiles
            .iter()
            .find(|m| m.id == id)
            .ok_or_else(|| ContextError::UnknownMissile(id.to_string()))
    }

    pub fn uav(&self, id: &str) -> Result<&UavSlot, ContextError> {
        self.uavs
            .iter()
            .find(|u| u.id == id)
            .ok_or_else(|| ContextError::UnknownUav(id.to_string()))
    }

    /// 指定した無人機編隊の戦略ベクトル配置
    pub fn layout<S: AsRef<str>>(&self, uav_ids: &[S], canisters_per_uav: usize) -> Result<StrategyLayout, ContextError> {
        let slots = uav_ids
            .iter()
            .map(|id| self.uav(id.as_ref()).cloned())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(StrategyLayout::new(slots, canisters_per_uav))
    }

    /// ミサイル 1 発に対する評価器を作成します
    pub fn evaluator<S: AsRef<str>>(
        &self,
        missile_id: &str,
        uav_ids: &[S],
        canisters_per_uav: usize,
    ) -> Result<FitnessEvaluator, ContextError> {
        Ok(FitnessEvaluator::new(
            self.physics,
            self.grid,
            self.missile(missile_id)?.clone(),
            self.real_target.center,
            self.layout(uav_ids, canisters_per_uav)?,
        ))
    }
}

/// YAML の最適化設定を PSO 設定へ変換
pub fn pso_config(optimizer: &OptimizerConfig, seed: u64) -> PsoConfig {
    PsoConfig {
        particles: optimizer.particles,
        iterations: optimizer.iterations,
        inertia: optimizer.inertia,
        cognitive: optimizer.cognitive,
        social: optimizer.social,
        seed,
        report_every: optimizer.report_every,
        stall: optimizer.stall.as_ref().map(|s| StallCriterion {
            iterations: s.iterations,
            tolerance: s.tolerance,
        }),
    }
}
