use clap::{Arg, ArgAction, Command, value_parser};
use smokesim::logging::{LogConfig, LogOutput, init_logging, level_for_verbosity, parse_log_level};
use smokesim::scenario::ScenarioConfig;
use smokesim::simulation::SimulationEngine;
use smokesim::trace::{DEFAULT_RENDER_DT, write_traces};
use tracing::info;

fn main() {
    // コマンドライン引数の解析
    let matches = Command::new("smokesim")
        .version(env!("CARGO_PKG_VERSION"))
        .about("煙幕遮蔽シミュレーション (Smoke Screen Simulation)")
        .long_about(
            "無人機が投下する煙幕弾による視線遮蔽時間を評価・最適化します。\n\
             シナリオファイルに記述された評価・最適化・任務割り当てのタスクを順に実行します。",
        )
        .arg(
            Arg::new("scenario")
                .short('s')
                .long("scenario")
                .value_name("FILE")
                .help("シナリオファイル(.yaml)のパスを指定"),
        )
        .arg(
            Arg::new("info")
                .short('i')
                .long("info")
                .action(ArgAction::SetTrue)
                .help("シナリオの情報のみ表示して終了"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::Count)
                .help("詳細出力レベル (-v: 基本, -vv: 詳細, -vvv: デバッグ)"),
        )
        .arg(
            Arg::new("seed")
                .long("seed")
                .value_name("N")
                .value_parser(value_parser!(u64))
                .help("乱数シードを上書き"),
        )
        .arg(
            Arg::new("task")
                .long("task")
                .value_name("NAME")
                .help("指定した名前のタスクのみ実行"),
        )
        .arg(
            Arg::new("trace")
                .long("trace")
                .value_name("FILE")
                .help("描画用の軌跡をYAMLで出力"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .help("ログレベル (trace, debug, info, warn, error)"),
        )
        .arg(
            Arg::new("log-output")
                .long("log-output")
                .value_name("TARGET")
                .value_parser(|s: &str| s.parse::<LogOutput>())
                .default_value("console")
                .help("ログ出力先 (console, file, both)"),
        )
        .get_matches();

    let verbose_level = matches.get_count("verbose");

    let level = matches
        .get_one::<String>("log-level")
        .map(|s| parse_log_level(s))
        .unwrap_or_else(|| level_for_verbosity(verbose_level));
    let output = matches
        .get_one::<LogOutput>("log-output")
        .copied()
        .unwrap_or(LogOutput::Console);

    let _log_guard = match init_logging(LogConfig {
        level,
        output,
        ..LogConfig::default()
    }) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("ログ初期化エラー: {}", e);
            std::process::exit(1);
        }
    };

    println!("煙幕遮蔽シミュレーション (Smoke Screen Simulation) - smokesim v{}", env!("CARGO_PKG_VERSION"));
    println!();

    if verbose_level > 0 {
        println!("詳細出力レベル: {}", verbose_level);
    }

    let Some(scenario_path) = matches.get_one::<String>("scenario") else {
        show_default_help();
        return;
    };

    let options = RunOptions {
        info_only: matches.get_flag("info"),
        verbose_level,
        seed: matches.get_one::<u64>("seed").copied(),
        task: matches.get_one::<String>("task").cloned(),
        trace_path: matches.get_one::<String>("trace").cloned(),
    };

    match run_scenario(scenario_path, options) {
        Ok(_) => {
            if verbose_level > 0 {
                println!("シナリオ実行が正常に完了しました。");
            }
        }
        Err(e) => {
            eprintln!("エラー: {}", e);
            std::process::exit(1);
        }
    }
}

struct RunOptions {
    info_only: bool,
    verbose_level: u8,
    seed: Option<u64>,
    task: Option<String>,
    trace_path: Option<String>,
}

/// シナリオファイルを読み込んで実行
fn run_scenario(scenario_path: &str, options: RunOptions) -> Result<(), Box<dyn std::error::Error>> {
    let scenario = ScenarioConfig::from_file(scenario_path)?;

    if options.verbose_level > 0 {
        println!("シナリオファイル読み込み完了: {}", scenario_path);
    }

    scenario.print_summary();
    println!();

    if options.info_only {
        return Ok(());
    }

    let mut simulation = SimulationEngine::new(scenario, options.verbose_level);
    if let Some(seed) = options.seed {
        simulation = simulation.with_seed(seed);
    }
    if let Some(task) = options.task {
        simulation = simulation.with_task_filter(task);
    }
    if options.trace_path.is_some() {
        simulation = simulation.with_trace(DEFAULT_RENDER_DT);
    }

    simulation.initialize()?;
    simulation.run()?;

    for report in simulation.reports() {
        report.print_summary();
    }

    if let Some(path) = options.trace_path {
        write_traces(&path, simulation.traces())?;
        info!(path = %path, traces = simulation.traces().len(), "軌跡を出力しました");
    }

    Ok(())
}

/// デフォルトヘルプとシナリオ一覧を表示
fn show_default_help() {
    println!("使用方法:");
    println!("  smokesim -s <FILE> [オプション]");
    println!();
    println!("オプション:");
    println!("  -s, --scenario <FILE>   シナリオファイルを指定して実行");
    println!("  -i, --info              シナリオ情報のみ表示");
    println!("  -v, --verbose           詳細出力 (複数指定で詳細レベル上昇)");
    println!("      --seed <N>          乱数シードを上書き");
    println!("      --task <NAME>       指定したタスクのみ実行");
    println!("      --trace <FILE>      描画用の軌跡をYAMLで出力");
    println!("      --log-level <LEVEL> ログレベル");
    println!("      --log-output <TGT>  ログ出力先 (console, file, both)");
    println!("  -h, --help              このヘルプを表示");
    println!();
    println!("利用可能なシナリオファイル:");
    println!("  scenarios/single_release.yaml  - 単機単弾の評価と最適化");
    println!("  scenarios/triple_release.yaml  - 単機三弾の最適化");
    println!("  scenarios/three_uavs.yaml      - 三機協同の最適化");
    println!("  scenarios/allocation.yaml      - 複数ミサイルへの任務割り当て");
    println!();
    println!("例:");
    println!("  smokesim -s scenarios/single_release.yaml");
    println!("  smokesim -s scenarios/allocation.yaml -v --seed 7");
    println!("  smokesim -s scenarios/single_release.yaml --task fixed --trace trace.yaml");
}
