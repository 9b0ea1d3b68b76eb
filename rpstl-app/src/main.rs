use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rpstl_config::{AppConfig, ConfigError};
use rpstl_engine::{BatchRunner, MODES, ModeRequest, find_mode, spawn_batch};
use rpstl_io::AutoStore;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};
use walkdir::WalkDir;

const USAGE: &str = "用法：rpstl <模式> <目录> [--param 名称=值]... [--config 配置文件]\n      rpstl --list-modes";

struct Invocation {
    mode: String,
    folder: PathBuf,
    parameters: Vec<(String, String)>,
    config_override: Option<PathBuf>,
}

fn main() {
    let invocation = match parse_args(std::env::args().skip(1)) {
        Ok(Some(invocation)) => invocation,
        Ok(None) => return,
        Err(message) => {
            eprintln!("{message}\n{USAGE}");
            std::process::exit(1);
        }
    };

    let config = load_configuration(invocation.config_override.clone());
    init_logging(&config);
    info!(mode = %invocation.mode, folder = %invocation.folder.display(), "启动 RPSTL 批处理");

    if !invocation.folder.is_dir() {
        error!(folder = %invocation.folder.display(), "目录不存在");
        std::process::exit(1);
    }

    let request = invocation.parameters.iter().fold(
        ModeRequest::new(invocation.mode.clone(), invocation.folder.clone()),
        |request, (name, value)| request.with_parameter(name.clone(), value.clone()),
    );
    let recursive = find_mode(&invocation.mode).is_some_and(|mode| mode.recursive);
    let discovered = discover_drawings(&invocation.folder, &config.batch.extensions, recursive);
    info!(count = discovered.len(), "发现图纸");

    let store = Arc::new(AutoStore::new());
    let plan = match request.plan(&config, discovered, store.clone()) {
        Ok(plan) => plan,
        Err(err) => {
            error!(error = %err, "无法生成批处理计划");
            std::process::exit(1);
        }
    };
    if plan.jobs.is_empty() {
        warn!("没有可处理的图纸");
    }

    let runner = BatchRunner::with_config(store, &config.batch);
    let handle = match spawn_batch(runner, plan) {
        Ok(handle) => handle,
        Err(err) => {
            error!(error = %err, "无法启动批处理线程");
            std::process::exit(1);
        }
    };

    let mut reported = 0;
    while !handle.is_finished() {
        let progress = handle.progress();
        if progress != reported {
            info!(progress, "处理进度");
            reported = progress;
        }
        thread::sleep(Duration::from_millis(200));
    }

    match handle.join() {
        Ok(summary) => println!("{summary}"),
        Err(err) => {
            error!(error = %err, "批处理失败");
            std::process::exit(1);
        }
    }
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Option<Invocation>, String> {
    let mut positional = Vec::new();
    let mut parameters = Vec::new();
    let mut config_override = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--list-modes" => {
                print_modes();
                return Ok(None);
            }
            "--help" | "-h" => {
                println!("{USAGE}");
                return Ok(None);
            }
            "--config" => {
                let path = args.next().ok_or("`--config` 需要提供配置文件路径")?;
                config_override = Some(PathBuf::from(path));
            }
            "--param" => {
                let raw = args.next().ok_or("`--param` 需要 名称=值")?;
                let (name, value) = raw
                    .split_once('=')
                    .ok_or_else(|| format!("参数格式错误：{raw}"))?;
                parameters.push((name.trim().to_string(), value.trim().to_string()));
            }
            other if other.starts_with("--") => return Err(format!("未知参数：{other}")),
            _ => positional.push(arg),
        }
    }

    let mut positional = positional.into_iter();
    let (Some(mode), Some(folder), None) = (positional.next(), positional.next(), positional.next())
    else {
        return Err("需要且只需要 模式 与 目录 两个位置参数".to_string());
    };
    Ok(Some(Invocation {
        mode,
        folder: PathBuf::from(folder),
        parameters,
        config_override,
    }))
}

fn print_modes() {
    for mode in MODES {
        println!("{:<18} {}", mode.id, mode.description);
        for parameter in mode.parameters {
            let marker = if parameter.required { "必填" } else { "可选" };
            println!("    --param {}=…  ({marker}) {}", parameter.name, parameter.description);
        }
    }
}

/// 默认只扫描目录本身；`recursive` 时包含所有子目录。按路径排序。
fn discover_drawings(folder: &Path, extensions: &[String], recursive: bool) -> Vec<PathBuf> {
    let depth = if recursive { usize::MAX } else { 1 };
    let mut drawings: Vec<PathBuf> = WalkDir::new(folder)
        .max_depth(depth)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!(error = %err, "跳过无法访问的目录项");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| {
                    extensions
                        .iter()
                        .any(|wanted| wanted.trim_start_matches('.').eq_ignore_ascii_case(ext))
                })
        })
        .collect();
    drawings.sort();
    drawings
}

fn load_configuration(override_path: Option<PathBuf>) -> AppConfig {
    match override_path {
        Some(path) => AppConfig::from_file(&path).unwrap_or_else(|err| {
            warn!(path = %path.display(), error = %err, "加载指定配置失败，使用默认配置");
            AppConfig::default()
        }),
        None => match AppConfig::discover() {
            Ok(cfg) => cfg,
            Err(err) => {
                match &err {
                    ConfigError::Io { path, .. } | ConfigError::Parse { path, .. } => {
                        warn!(path = %path.display(), error = %err, "加载默认配置失败，使用内建默认值");
                    }
                    ConfigError::Context { .. } => {
                        warn!(error = %err, "加载默认配置失败，使用内建默认值");
                    }
                }
                AppConfig::default()
            }
        },
    }
}

fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_new(config.logging.level.clone()).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(filter);
    if subscriber.try_init().is_err() {
        // 已初始化，忽略
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn args(raw: &[&str]) -> impl Iterator<Item = String> {
        raw.iter().map(|arg| arg.to_string()).collect::<Vec<_>>().into_iter()
    }

    #[test]
    fn parses_mode_folder_and_parameters() {
        let invocation = parse_args(args(&[
            "remap",
            "drawings",
            "--param",
            "mapping=rows.txt",
            "--config",
            "custom.toml",
        ]))
        .expect("valid arguments")
        .expect("invocation");
        assert_eq!(invocation.mode, "remap");
        assert_eq!(invocation.folder, PathBuf::from("drawings"));
        assert_eq!(
            invocation.parameters,
            vec![("mapping".to_string(), "rows.txt".to_string())]
        );
        assert_eq!(invocation.config_override, Some(PathBuf::from("custom.toml")));
    }

    #[test]
    fn rejects_malformed_arguments() {
        assert!(parse_args(args(&["remap"])).is_err());
        assert!(parse_args(args(&["remap", "a", "b"])).is_err());
        assert!(parse_args(args(&["remap", "a", "--param", "novalue"])).is_err());
        assert!(parse_args(args(&["remap", "a", "--verbose"])).is_err());
    }

    #[test]
    fn discovery_filters_extensions_and_honours_depth() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("b.dxf"), "").expect("write");
        fs::write(dir.path().join("a.JSON"), "").expect("write");
        fs::write(dir.path().join("notes.txt"), "").expect("write");
        fs::create_dir(dir.path().join("Updated")).expect("mkdir");
        fs::write(dir.path().join("Updated").join("c.dxf"), "").expect("write");

        let extensions = ["json".to_string(), ".dxf".to_string()];
        let found = discover_drawings(dir.path(), &extensions, false);
        assert_eq!(
            found,
            vec![dir.path().join("a.JSON"), dir.path().join("b.dxf")]
        );

        let all = discover_drawings(dir.path(), &extensions, true);
        assert_eq!(
            all,
            vec![
                dir.path().join("Updated").join("c.dxf"),
                dir.path().join("a.JSON"),
                dir.path().join("b.dxf"),
            ]
        );
    }
}
