use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// シナリオメタデータ
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScenarioMeta {
    pub version: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// シミュレーション設定
///
/// 同一ファイル内の全タスクはこの時間刻みで評価されます。
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimulationConfig {
    #[serde(default = "default_dt")]
    pub dt_s: f64,
    #[serde(default = "default_t_max")]
    pub t_max_s: f64,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_dt() -> f64 {
    crate::fitness::DEFAULT_DT
}

fn default_t_max() -> f64 {
    crate::fitness::DEFAULT_HORIZON
}

fn default_seed() -> u64 {
    42
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq)]
pub struct Position3D {
    pub x_m: f64,
    pub y_m: f64,
    pub z_m: f64,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// 物理定数
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PhysicsConfig {
    pub gravity_mps2: Vector3,
    pub cloud_sink_mps: Vector3,
    pub smoke_radius_m: f64,
    pub smoke_lifespan_s: f64,
    /// 同一無人機の連続投下に必要な最小間隔
    pub min_release_interval_s: f64,
}

/// 真目標（円柱）
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RealTargetConfig {
    /// 遮蔽判定に使う代表点
    pub center: Position3D,
    #[serde(default)]
    pub radius_m: f64,
    #[serde(default)]
    pub height_m: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TargetsConfig {
    pub fake: Position3D,
    pub real: RealTargetConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MissileConfig {
    pub id: String,
    pub pos: Position3D,
    pub speed_mps: f64,
    /// 省略時は偽目標
    #[serde(default)]
    pub aim: Option<Position3D>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UavConfig {
    pub id: String,
    pub pos: Position3D,
}

/// 決定変数の探索範囲 `[下限, 上限]`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BoundsConfig {
    pub speed_mps: [f64; 2],
    pub heading_deg: [f64; 2],
    pub release_s: [f64; 2],
    pub release_gap_s: [f64; 2],
    pub fuse_delay_s: [f64; 2],
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StallConfig {
    pub iterations: usize,
    #[serde(default)]
    pub tolerance: f64,
}

/// PSO パラメータ
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OptimizerConfig {
    pub particles: usize,
    pub iterations: usize,
    pub inertia: f64,
    pub cognitive: f64,
    pub social: f64,
    #[serde(default = "default_report_every")]
    pub report_every: usize,
    #[serde(default)]
    pub stall: Option<StallConfig>,
}

fn default_report_every() -> usize {
    10
}

/// 固定戦略での 1 機分の計画
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FixedPlanConfig {
    pub uav: String,
    pub speed_mps: f64,
    pub heading_deg: f64,
    pub release_s: Vec<f64>,
    pub fuse_delay_s: f64,
}

/// 合流点に基づく初期解の指定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RendezvousConfig {
    pub point: Position3D,
    pub fuse_delay_s: f64,
}

/// 威脅度の重み
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ThreatWeightsConfig {
    pub time_to_impact: f64,
    pub min_distance: f64,
}

impl Default for ThreatWeightsConfig {
    fn default() -> Self {
        Self {
            time_to_impact: 0.5,
            min_distance: 0.5,
        }
    }
}

/// 部分問題ごとの PSO 規模
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SubproblemBudgetConfig {
    pub particles_per_dim: usize,
    pub iterations_per_dim: usize,
    pub min_iterations: usize,
    /// この次元数未満では `min_iterations` を使う
    pub small_dim_threshold: usize,
}

impl Default for SubproblemBudgetConfig {
    fn default() -> Self {
        Self {
            particles_per_dim: 10,
            iterations_per_dim: 25,
            min_iterations: 200,
            small_dim_threshold: 10,
        }
    }
}

/// シナリオで実行するタスク
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskConfig {
    /// 固定戦略の遮蔽時間を評価
    Evaluate {
        name: String,
        missile: String,
        plans: Vec<FixedPlanConfig>,
    },
    /// 1 発のミサイルに対し、無人機編隊の戦略を最適化
    Optimize {
        name: String,
        missile: String,
        uavs: Vec<String>,
        canisters_per_uav: usize,
        #[serde(default)]
        seeds: Vec<Vec<f64>>,
        #[serde(default)]
        rendezvous: Option<RendezvousConfig>,
        #[serde(default)]
        optimizer: Option<OptimizerConfig>,
    },
    /// 複数ミサイルへの無人機の割り当てと部分問題の最適化
    Allocate {
        name: String,
        uav_counts: Vec<usize>,
        canisters_per_uav: usize,
        #[serde(default)]
        threat_weights: ThreatWeightsConfig,
        #[serde(default)]
        budget: SubproblemBudgetConfig,
    },
}

impl TaskConfig {
    pub fn name(&self) -> &str {
        match self {
            TaskConfig::Evaluate { name, .. }
            | TaskConfig::Optimize { name, .. }
            | TaskConfig::Allocate { name, .. } => name,
        }
    }
}

/// 完全なシナリオ設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScenarioConfig {
    pub meta: ScenarioMeta,
    pub sim: SimulationConfig,
    pub physics: PhysicsConfig,
    pub targets: TargetsConfig,
    pub missiles: Vec<MissileConfig>,
    pub uavs: Vec<UavConfig>,
    pub bounds: BoundsConfig,
    pub optimizer: OptimizerConfig,
    #[serde(default)]
    pub tasks: Vec<TaskConfig>,
}

impl ScenarioConfig {
    /// YAMLファイルからシナリオ設定を読み込み
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ScenarioError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ScenarioError::FileNotFound(path.to_path_buf()));
        }

        let contents = fs::read_to_string(path).map_err(|e| ScenarioError::Io(path.to_path_buf(), e))?;

        let config: ScenarioConfig =
            serde_yaml::from_str(&contents).map_err(|e| ScenarioError::Parse(path.to_path_buf(), e))?;

        config.validate()?;

        Ok(config)
    }

    /// YAML文字列からシナリオ設定を読み込み
    pub fn from_yaml_str(contents: &str) -> Result<Self, ScenarioError> {
        let config: ScenarioConfig =
            serde_yaml::from_str(contents).map_err(|e| ScenarioError::Parse(PathBuf::from("<inline>"), e))?;
        config.validate()?;
        Ok(config)
    }

    /// 設定の検証
    pub fn validate(&self) -> Result<(), ScenarioError> {
        // 時間設定の検証
        if !(self.sim.dt_s > 0.0) {
            return Err(invalid("dt_s must be positive"));
        }
        if !(self.sim.t_max_s > 0.0) {
            return Err(invalid("t_max_s must be positive"));
        }
        if self.sim.dt_s > self.sim.t_max_s {
            return Err(invalid("dt_s must not exceed t_max_s"));
        }

        // 物理定数の検証
        let physics = &self.physics;
        if !(physics.smoke_radius_m > 0.0) {
            return Err(invalid("smoke_radius_m must be positive"));
        }
        if !(physics.smoke_lifespan_s > 0.0) {
            return Err(invalid("smoke_lifespan_s must be positive"));
        }
        if !(physics.min_release_interval_s >= 0.0) {
            return Err(invalid("min_release_interval_s must not be negative"));
        }
        for (name, v) in [("gravity_mps2", &physics.gravity_mps2), ("cloud_sink_mps", &physics.cloud_sink_mps)] {
            if !(v.x.is_finite() && v.y.is_finite() && v.z.is_finite()) {
                return Err(invalid(format!("{} must be finite", name)));
            }
        }

        // 探索範囲の検証
        let bounds = &self.bounds;
        for (name, [lo, hi]) in [
            ("speed_mps", bounds.speed_mps),
            ("heading_deg", bounds.heading_deg),
            ("release_s", bounds.release_s),
            ("release_gap_s", bounds.release_gap_s),
            ("fuse_delay_s", bounds.fuse_delay_s),
        ] {
            if !lo.is_finite() || !hi.is_finite() || lo > hi {
                return Err(invalid(format!("Invalid bounds {}: [{}, {}]", name, lo, hi)));
            }
        }
        if bounds.release_s[0] < 0.0 || bounds.fuse_delay_s[0] < 0.0 {
            return Err(invalid("release_s and fuse_delay_s must not be negative"));
        }
        if bounds.release_gap_s[0] < physics.min_release_interval_s {
            return Err(invalid(format!(
                "release_gap_s lower bound {} is below min_release_interval_s {}",
                bounds.release_gap_s[0], physics.min_release_interval_s
            )));
        }

        self.optimizer_is_valid(&self.optimizer)?;

        // 実体IDの検証
        let missile_ids = unique_ids("missile", self.missiles.iter().map(|m| m.id.as_str()))?;
        let uav_ids = unique_ids("uav", self.uavs.iter().map(|u| u.id.as_str()))?;
        for missile in &self.missiles {
            if !(missile.speed_mps > 0.0) {
                return Err(invalid(format!("Missile {} speed must be positive", missile.id)));
            }
        }

        // タスクの検証
        let mut task_names = HashSet::new();
        for task in &self.tasks {
            if !task_names.insert(task.name()) {
                return Err(invalid(format!("Duplicate task name {}", task.name())));
            }
            self.validate_task(task, &missile_ids, &uav_ids)?;
        }

        Ok(())
    }

    fn optimizer_is_valid(&self, optimizer: &OptimizerConfig) -> Result<(), ScenarioError> {
        if optimizer.particles == 0 {
            return Err(invalid("optimizer.particles must be positive"));
        }
        for (name, value) in [
            ("inertia", optimizer.inertia),
            ("cognitive", optimizer.cognitive),
            ("social", optimizer.social),
        ] {
            if !value.is_finite() {
                return Err(invalid(format!("optimizer.{} must be finite", name)));
            }
        }
        Ok(())
    }

    fn validate_task(
        &self,
        task: &TaskConfig,
        missile_ids: &HashSet<&str>,
        uav_ids: &HashSet<&str>,
    ) -> Result<(), ScenarioError> {
        let name = task.name();
        let known_missile = |id: &str| {
            if missile_ids.contains(id) {
                Ok(())
            } else {
                Err(invalid(format!("Task {} refers to unknown missile {}", name, id)))
            }
        };
        let known_uav = |id: &str| {
            if uav_ids.contains(id) {
                Ok(())
            } else {
                Err(invalid(format!("Task {} refers to unknown uav {}", name, id)))
            }
        };

        match task {
            TaskConfig::Evaluate { missile, plans, .. } => {
                known_missile(missile)?;
                if plans.is_empty() {
                    return Err(invalid(format!("Task {} has no plans", name)));
                }
                let fuse_delay = plans[0].fuse_delay_s;
                for plan in plans {
                    known_uav(&plan.uav)?;
                    if !(plan.speed_mps.is_finite() && plan.heading_deg.is_finite()) {
                        return Err(invalid(format!(
                            "Task {} plan for {} has non-finite speed or heading",
                            name, plan.uav
                        )));
                    }
                    if plan.fuse_delay_s != fuse_delay {
                        return Err(invalid(format!(
                            "Task {} plan for {} must share fuse_delay_s {} with the other plans",
                            name, plan.uav, fuse_delay
                        )));
                    }
                    if plan.release_s.is_empty() {
                        return Err(invalid(format!("Task {} plan for {} has no releases", name, plan.uav)));
                    }
                    if plan.release_s.iter().any(|t| !(*t >= 0.0)) || !(plan.fuse_delay_s >= 0.0) {
                        return Err(invalid(format!("Task {} plan for {} has negative times", name, plan.uav)));
                    }
                    let min_gap = self.physics.min_release_interval_s;
                    if plan.release_s.windows(2).any(|w| w[1] - w[0] < min_gap) {
                        return Err(invalid(format!(
                            "Task {} plan for {} violates min_release_interval_s {}",
                            name, plan.uav, min_gap
                        )));
                    }
                }
            }
            TaskConfig::Optimize {
                missile,
                uavs,
                canisters_per_uav,
                seeds,
                rendezvous,
                optimizer,
                ..
            } => {
                known_missile(missile)?;
                if uavs.is_empty() {
                    return Err(invalid(format!("Task {} has no uavs", name)));
                }
                unique_ids("task uav", uavs.iter().map(String::as_str))?;
                for uav in uavs {
                    known_uav(uav)?;
                }
                if *canisters_per_uav == 0 {
                    return Err(invalid(format!("Task {} canisters_per_uav must be positive", name)));
                }
                let dims = uavs.len() * (2 + canisters_per_uav) + 1;
                let particles = optimizer.as_ref().unwrap_or(&self.optimizer).particles;
                // 合流点の初期解も粒子を 1 つ使う
                if seeds.len() + usize::from(rendezvous.is_some()) > particles {
                    return Err(invalid(format!("Task {} has more seeds than particles", name)));
                }
                if let Some(seed) = seeds.iter().find(|s| s.len() != dims) {
                    return Err(invalid(format!(
                        "Task {} seed has {} values, expected {}",
                        name,
                        seed.len(),
                        dims
                    )));
                }
                if let Some(optimizer) = optimizer {
                    self.optimizer_is_valid(optimizer)?;
                }
            }
            TaskConfig::Allocate {
                uav_counts,
                canisters_per_uav,
                threat_weights,
                budget,
                ..
            } => {
                if uav_counts.is_empty() {
                    return Err(invalid(format!("Task {} uav_counts is empty", name)));
                }
                if *canisters_per_uav == 0 {
                    return Err(invalid(format!("Task {} canisters_per_uav must be positive", name)));
                }
                if !(threat_weights.time_to_impact >= 0.0 && threat_weights.min_distance >= 0.0) {
                    return Err(invalid(format!("Task {} threat weights must not be negative", name)));
                }
                if budget.particles_per_dim == 0 {
                    return Err(invalid(format!("Task {} particles_per_dim must be positive", name)));
                }
            }
        }
        Ok(())
    }

    /// シナリオの概要を表示
    pub fn print_summary(&self) {
        println!("=== シナリオ情報 ===");
        println!("名前: {}", self.meta.name);
        println!("説明: {}", self.meta.description);
        println!("バージョン: {}", self.meta.version);
        println!();

        println!("=== シミュレーション設定 ===");
        println!("時間刻み: {:.3}秒", self.sim.dt_s);
        println!("最大時間: {:.1}秒", self.sim.t_max_s);
        println!("シード値: {}", self.sim.seed);
        println!();

        println!("=== 物理定数 ===");
        let g = &self.physics.gravity_mps2;
        println!("重力加速度: ({:.2}, {:.2}, {:.2}) m/s²", g.x, g.y, g.z);
        let s = &self.physics.cloud_sink_mps;
        println!("煙幕沈降速度: ({:.2}, {:.2}, {:.2}) m/s", s.x, s.y, s.z);
        println!("煙幕有効半径: {:.1}m", self.physics.smoke_radius_m);
        println!("煙幕有効時間: {:.1}秒", self.physics.smoke_lifespan_s);
        println!();

        println!("=== 実体 ===");
        println!("ミサイル: {}発", self.missiles.len());
        for missile in &self.missiles {
            println!(
                "  {}: ({:.0}, {:.0}, {:.0}) {:.0}m/s",
                missile.id, missile.pos.x_m, missile.pos.y_m, missile.pos.z_m, missile.speed_mps
            );
        }
        println!("無人機: {}機", self.uavs.len());
        for uav in &self.uavs {
            println!("  {}: ({:.0}, {:.0}, {:.0})", uav.id, uav.pos.x_m, uav.pos.y_m, uav.pos.z_m);
        }
        println!();

        println!("=== タスク ===");
        for task in &self.tasks {
            match task {
                TaskConfig::Evaluate { name, missile, plans } => {
                    println!("  {}: 固定戦略評価 (対象: {}, 無人機: {}機)", name, missile, plans.len())
                }
                TaskConfig::Optimize {
                    name,
                    missile,
                    uavs,
                    canisters_per_uav,
                    ..
                } => println!(
                    "  {}: 戦略最適化 (対象: {}, 無人機: {:?}, 1機あたり{}発)",
                    name, missile, uavs, canisters_per_uav
                ),
                TaskConfig::Allocate {
                    name,
                    uav_counts,
                    canisters_per_uav,
                    ..
                } => println!(
                    "  {}: 任務割り当て (配分: {:?}, 1機あたり{}発)",
                    name, uav_counts, canisters_per_uav
                ),
            }
        }
    }
}

fn invalid(message: impl Into<String>) -> ScenarioError {
    ScenarioError::Validation(message.into())
}

fn unique_ids<'a>(kind: &str, ids: impl Iterator<Item = &'a str>) -> Result<HashSet<&'a str>, ScenarioError> {
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(invalid(format!("Duplicate {} id {}", kind, id)));
        }
    }
    Ok(seen)
}

/// シナリオ読み込みエラー
#[derive(Error, Debug)]
pub enum ScenarioError {
    #[error("シナリオファイルが見つかりません: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("ファイル読み込みエラー {}: {1}", .0.display())]
    Io(PathBuf, #[source] std::io::Error),

    #[error("YAML解析エラー {}: {1}", .0.display())]
    Parse(PathBuf, #[source] serde_yaml::Error),

    #[error("設定検証エラー: {0}")]
    Validation(String),
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const SAMPLE: &str = r#"
meta:
  version: "1.0"
  name: sample
  description: 単発投下の評価と最適化
sim:
  dt_s: 0.01
  t_max_s: 70.0
  seed: 7
physics:
  gravity_mps2: { x: 0.0, y: 0.0, z: -9.8 }
  cloud_sink_mps: { x: 0.0, y: 0.0, z: -3.0 }
  smoke_radius_m: 10.0
  smoke_lifespan_s: 20.0
  min_release_interval_s: 1.0
targets:
  fake: { x_m: 0.0, y_m: 0.0, z_m: 0.0 }
  real:
    center: { x_m: 0.0, y_m: 200.0, z_m: 5.0 }
    radius_m: 7.0
    height_m: 10.0
missiles:
  - { id: M1, pos: { x_m: 20000.0, y_m: 0.0, z_m: 2000.0 }, speed_mps: 300.0 }
  - { id: M2, pos: { x_m: 19000.0, y_m: 600.0, z_m: 2100.0 }, speed_mps: 300.0 }
uavs:
  - { id: FY1, pos: { x_m: 17800.0, y_m: 0.0, z_m: 1800.0 } }
  - { id: FY2, pos: { x_m: 12000.0, y_m: 1400.0, z_m: 1400.0 } }
bounds:
  speed_mps: [70.0, 140.0]
  heading_deg: [0.0, 360.0]
  release_s: [0.1, 40.0]
  release_gap_s: [1.0, 10.0]
  fuse_delay_s: [0.1, 15.0]
optimizer:
  particles: 8
  iterations: 4
  inertia: 0.5
  cognitive: 1.5
  social: 1.5
  report_every: 2
tasks:
  - kind: evaluate
    name: fixed
    missile: M1
    plans:
      - { uav: FY1, speed_mps: 120.0, heading_deg: 180.0, release_s: [1.5], fuse_delay_s: 3.6 }
  - kind: optimize
    name: single
    missile: M1
    uavs: [FY1]
    canisters_per_uav: 1
    seeds:
      - [120.0, 180.0, 1.5, 3.6]
  - kind: allocate
    name: team
    uav_counts: [1, 1]
    canisters_per_uav: 1
    budget:
      particles_per_dim: 1
      iterations_per_dim: 1
      min_iterations: 2
      small_dim_threshold: 10
"#;

    #[test]
    fn test_parse_sample() {
        let config = ScenarioConfig::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(config.missiles.len(), 2);
        assert_eq!(config.tasks.len(), 3);
        assert!(matches!(config.tasks[0], TaskConfig::Evaluate { .. }));
        assert_eq!(config.tasks[2].name(), "team");
        assert!(config.missiles[0].aim.is_none());
        match &config.tasks[2] {
            TaskConfig::Allocate { threat_weights, .. } => assert_eq!(threat_weights.time_to_impact, 0.5),
            other => panic!("unexpected task {:?}", other),
        }
    }

    #[test]
    fn test_sim_defaults() {
        let yaml = SAMPLE.replace("  dt_s: 0.01\n  t_max_s: 70.0\n  seed: 7\n", "  seed: 7\n");
        let config = ScenarioConfig::from_yaml_str(&yaml).unwrap();
        assert_eq!(config.sim.dt_s, 0.01);
        assert_eq!(config.sim.t_max_s, 70.0);
    }

    #[test]
    fn test_rejects_non_positive_dt() {
        let yaml = SAMPLE.replace("dt_s: 0.01", "dt_s: 0.0");
        assert!(matches!(
            ScenarioConfig::from_yaml_str(&yaml),
            Err(ScenarioError::Validation(_))
        ));
    }

    #[test]
    fn test_rejects_inverted_bounds() {
        let yaml = SAMPLE.replace("speed_mps: [70.0, 140.0]", "speed_mps: [140.0, 70.0]");
        assert!(ScenarioConfig::from_yaml_str(&yaml).is_err());
    }

    #[test]
    fn test_rejects_gap_below_reload_interval() {
        let yaml = SAMPLE.replace("release_gap_s: [1.0, 10.0]", "release_gap_s: [0.5, 10.0]");
        let err = ScenarioConfig::from_yaml_str(&yaml).unwrap_err();
        assert!(err.to_string().contains("min_release_interval_s"));
    }

    #[test]
    fn test_rejects_unknown_uav() {
        let yaml = SAMPLE.replace("uavs: [FY1]", "uavs: [FY9]");
        let err = ScenarioConfig::from_yaml_str(&yaml).unwrap_err();
        assert!(err.to_string().contains("FY9"));
    }

    #[test]
    fn test_rejects_seed_dimension() {
        let yaml = SAMPLE.replace("- [120.0, 180.0, 1.5, 3.6]", "- [120.0, 180.0, 1.5]");
        assert!(ScenarioConfig::from_yaml_str(&yaml).is_err());
    }

    #[test]
    fn test_rejects_duplicate_ids() {
        let yaml = SAMPLE.replace("id: M2", "id: M1");
        let err = ScenarioConfig::from_yaml_str(&yaml).unwrap_err();
        assert!(err.to_string().contains("Duplicate"));
    }

    #[test]
    fn test_rejects_fixed_plan_reload_violation() {
        let yaml = SAMPLE.replace("release_s: [1.5]", "release_s: [1.5, 2.0]");
        assert!(ScenarioConfig::from_yaml_str(&yaml).is_err());
    }

    #[test]
    fn test_rejects_rendezvous_seed_beyond_particles() {
        let yaml = SAMPLE.replace("particles: 8", "particles: 1").replace(
            "      - [120.0, 180.0, 1.5, 3.6]\n",
            "      - [120.0, 180.0, 1.5, 3.6]\n    rendezvous:\n      point: { x_m: 17800.0, y_m: 0.0, z_m: 1800.0 }\n      fuse_delay_s: 3.6\n",
        );
        let err = ScenarioConfig::from_yaml_str(&yaml).unwrap_err();
        assert!(err.to_string().contains("more seeds than particles"));

        // 明示的な種だけなら 1 粒子で足りる
        let yaml = SAMPLE.replace("particles: 8", "particles: 1");
        assert!(ScenarioConfig::from_yaml_str(&yaml).is_ok());
    }

    #[test]
    fn test_rejects_mixed_fuse_delays() {
        let yaml = SAMPLE.replace(
            "      - { uav: FY1, speed_mps: 120.0, heading_deg: 180.0, release_s: [1.5], fuse_delay_s: 3.6 }\n",
            "      - { uav: FY1, speed_mps: 120.0, heading_deg: 180.0, release_s: [1.5], fuse_delay_s: 3.6 }\n      - { uav: FY2, speed_mps: 120.0, heading_deg: 180.0, release_s: [1.5], fuse_delay_s: 9.0 }\n",
        );
        let err = ScenarioConfig::from_yaml_str(&yaml).unwrap_err();
        assert!(err.to_string().contains("fuse_delay_s"));
    }

    #[test]
    fn test_rejects_non_finite_fixed_plan() {
        let yaml = SAMPLE.replace("speed_mps: 120.0, heading_deg: 180.0", "speed_mps: .nan, heading_deg: 180.0");
        assert!(ScenarioConfig::from_yaml_str(&yaml).is_err());
        let yaml = SAMPLE.replace("speed_mps: 120.0, heading_deg: 180.0", "speed_mps: 120.0, heading_deg: .inf");
        assert!(ScenarioConfig::from_yaml_str(&yaml).is_err());
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(
            ScenarioConfig::from_yaml_str("meta: ["),
            Err(ScenarioError::Parse(_, _))
        ));
    }

    #[test]
    fn test_bundled_scenarios_load() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("scenarios");
        for name in ["single_release", "triple_release", "three_uavs", "allocation"] {
            let config = ScenarioConfig::from_file(dir.join(format!("{}.yaml", name))).unwrap();
            assert_eq!(config.meta.name, name);
            assert!(!config.tasks.is_empty());
        }
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            ScenarioConfig::from_file("does/not/exist.yaml"),
            Err(ScenarioError::FileNotFound(_))
        ));
    }
}
