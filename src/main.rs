use anyhow::{Context, Result};
use kestrel_shadows::blur::{LayeredImage, SeparableBlur};
use kestrel_shadows::cascades::{split_planes, CascadeSplitter};
use kestrel_shadows::cli::{CliOptions, Command};
use kestrel_shadows::config::AppConfig;
use kestrel_shadows::file_watch::FileWatchService;
use serde::Serialize;
use std::cell::Cell;
use std::path::{Path, PathBuf};
use std::process;
use std::rc::Rc;
use std::thread;

const DEFAULT_CONFIG_PATH: &str = "config/shadows.json";
const DEFAULT_PREVIEW_PATH: &str = "shadow_preview.png";
const PREVIEW_SIZE: usize = 128;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let options = match CliOptions::parse_from_env() {
        Ok(options) => options,
        Err(err) => {
            eprintln!("[cli] {err}");
            print_usage();
            process::exit(2);
        }
    };
    if let Err(err) = run(&options) {
        eprintln!("kestrel_shadows error: {err:?}");
        process::exit(1);
    }
}

#[derive(Serialize)]
struct CascadeReport {
    index: usize,
    split_near: f32,
    split_far: f32,
    light_space_near: f32,
    light_space_far: f32,
    shadow_matrix: [f32; 16],
}

#[derive(Serialize)]
struct SplitReport {
    near: f32,
    far: f32,
    split_lambda: f32,
    planes: Vec<f32>,
    cascades: Vec<CascadeReport>,
}

fn run(options: &CliOptions) -> Result<()> {
    if options.command == Command::Help {
        print_usage();
        return Ok(());
    }
    let config_path = options.config_path.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let overrides = options.config_overrides();
    if !overrides.is_empty() {
        log::info!("[cli] overriding {}", overrides.applied_fields().join(", "));
    }
    let mut config = AppConfig::load_or_default(&config_path);
    config.apply_overrides(&overrides);
    match options.command {
        Command::Splits => {
            let report = split_report(&config)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Watch => watch_config(&config_path, &config, options),
        Command::Preview => {
            let output = options.output.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_PREVIEW_PATH));
            write_preview(&config, &output)
        }
        Command::Help => Ok(()),
    }
}

fn split_report(config: &AppConfig) -> Result<SplitReport> {
    let camera = config.camera.to_camera();
    let settings = config.shadow.cascade_settings();
    let mut splitter = CascadeSplitter::new(settings).context("Invalid cascade settings")?;
    let cascades = splitter.update(&camera, config.light.direction()).context("Cascade update failed")?;
    let cascades = cascades
        .iter()
        .enumerate()
        .map(|(index, cascade)| CascadeReport {
            index,
            split_near: cascade.split_near,
            split_far: cascade.split_far,
            light_space_near: cascade.light_space_near,
            light_space_far: cascade.light_space_far,
            shadow_matrix: cascade.shadow.to_cols_array(),
        })
        .collect();
    Ok(SplitReport {
        near: camera.near,
        far: camera.far,
        split_lambda: settings.split_lambda,
        planes: split_planes(settings.split_count, camera.near, camera.far, settings.split_lambda).to_vec(),
        cascades,
    })
}

/// Re-prints the split table every time the config file changes. Runs until interrupted.
fn watch_config(path: &Path, initial: &AppConfig, options: &CliOptions) -> Result<()> {
    let mut service = FileWatchService::new(initial.watch.poll_interval())?;
    let dirty = Rc::new(Cell::new(false));
    let flag = Rc::clone(&dirty);
    service
        .watch_and_load(path, move |_| flag.set(true))
        .with_context(|| format!("Failed to watch config {}", path.display()))?;
    let overrides = options.config_overrides();
    loop {
        service.poll();
        if dirty.replace(false) {
            let mut config = AppConfig::load_or_default(path);
            config.apply_overrides(&overrides);
            match split_report(&config) {
                Ok(report) => println!("{}", serde_json::to_string_pretty(&report)?),
                Err(err) => log::error!("[shadows] {err:?}"),
            }
        }
        thread::sleep(service.poll_interval());
    }
}

/// Blurs a synthetic exponential shadow layer on the CPU and writes it as PNG.
fn write_preview(config: &AppConfig, output: &Path) -> Result<()> {
    let blur = SeparableBlur::from_width(config.shadow.blur_kernel).context("Invalid shadow blur kernel")?;
    let factor = config.shadow.shadowing_factor;
    let mut layer = LayeredImage::new(PREVIEW_SIZE, PREVIEW_SIZE, 1);
    let occluder = PREVIEW_SIZE / 4..PREVIEW_SIZE * 3 / 4;
    for y in 0..PREVIEW_SIZE {
        for x in 0..PREVIEW_SIZE {
            let depth = if occluder.contains(&x) && occluder.contains(&y) { 0.4 } else { 1.0 };
            layer.set(x, y, 0, (factor * (depth - 1.0)).exp());
        }
    }
    let filtered = blur.apply(&layer);
    filtered.save_layer_png(0, output)?;
    log::info!("[blur] wrote {} preview to {}", blur.kernel().label(), output.display());
    Ok(())
}

fn print_usage() {
    eprintln!(
        "Usage: kestrel_shadows [splits|watch|preview|help] [--config <path>] [--output <png>] \
         [--cascades <n>] [--lambda <0..1>] [--resolution <px>] [--kernel <width>]"
    );
}
