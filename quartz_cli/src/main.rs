use clap::{Arg, ArgAction, ArgMatches, Command};
use indicatif::{MultiProgress, ProgressBar};
use indicatif_log_bridge::LogWrapper;
use std::error::Error;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use libquartz::acquisition::Manifest;
use libquartz::channel::DataChannel;
use libquartz::config::ConvertConfig;
use libquartz::converter::format_epoch;
use libquartz::dataset::{open, ChannelKey, DataSet, DataSource};
use libquartz::inspect::{check_capture, repair_capture, summarize_capture};
use libquartz::process::process;
use libquartz::uff::UffWriter;

type CliResult = Result<(), Box<dyn Error>>;

fn make_template_config(path: &Path) -> CliResult {
    let config = ConvertConfig::default();
    let yaml_str = serde_yaml::to_string(&config)?;
    let mut file = File::create(path)?;
    file.write_all(yaml_str.as_bytes())?;
    Ok(())
}

fn path_arg() -> Arg {
    Arg::new("path")
        .short('p')
        .long("path")
        .required(true)
        .help("Path to the configuration file")
}

fn files_arg() -> Arg {
    Arg::new("files")
        .required(true)
        .num_args(1..)
        .help("Capture files (.dat)")
}

fn get_path(matches: &ArgMatches, name: &str) -> Result<PathBuf, Box<dyn Error>> {
    matches
        .get_one::<String>(name)
        .map(PathBuf::from)
        .ok_or_else(|| format!("Missing argument {name}").into())
}

fn get_files(matches: &ArgMatches) -> Vec<PathBuf> {
    matches
        .get_many::<String>("files")
        .map(|files| files.map(PathBuf::from).collect())
        .unwrap_or_default()
}

fn convert(config_path: &Path, pb_manager: &MultiProgress) -> CliResult {
    // Load our config
    log::info!("Loading config from {}...", config_path.to_string_lossy());
    let config = ConvertConfig::read_config_file(config_path)?;
    log::info!("Config successfully loaded.");
    for path in config.capture_paths.iter() {
        log::info!("Capture Path: {}", path.to_string_lossy());
    }
    log::info!("Output Path: {}", config.output_path.to_string_lossy());
    log::info!("Output Format: {:?}", config.output_format);
    if let Some(path) = &config.calibration_path {
        log::info!("Calibration Path: {}", path.to_string_lossy());
    }
    if let Some(path) = &config.scale_path {
        log::info!("Scale Path: {}", path.to_string_lossy());
    }
    log::info!("Sample Rate: {} Hz", config.sample_rate);

    // Setup the progress bar
    let pb = pb_manager.add(ProgressBar::new(100));
    let status = Arc::new(Mutex::new(0.0));
    let sent_status = status.clone();
    // Spawn the task!
    let handle = std::thread::spawn(|| process(config, sent_status));

    let outcome: CliResult = loop {
        std::thread::sleep(std::time::Duration::from_millis(500));
        match status.lock() {
            Ok(stat) => pb.set_position((*stat * 100.0) as u64),
            Err(e) => log::error!("{e}"),
        }

        if handle.is_finished() {
            break match handle.join() {
                Ok(result) => match result {
                    Ok(summary) => {
                        log::info!(
                            "Successfully converted {} packets ({} rows) in {} blocks",
                            summary.packets,
                            summary.rows,
                            summary.blocks
                        );
                        if summary.gaps > 0 {
                            log::warn!(
                                "{} sequence gaps, {} packets missing",
                                summary.gaps,
                                summary.missing_packets
                            );
                        }
                        Ok(())
                    }
                    Err(e) => Err(format!("Conversion failed with error: {e}").into()),
                },
                Err(_) => Err("Failed to join conversion task!".into()),
            };
        }
    };

    pb.finish();
    outcome
}

/// Run `task` on every file, logging failures, and fail if any file did
fn for_each_file<T, E: Error>(
    files: &[PathBuf],
    task: impl Fn(&Path) -> Result<T, E>,
    show: impl Fn(T),
) -> CliResult {
    let mut failures = 0;
    for path in files {
        match task(path.as_path()) {
            Ok(value) => show(value),
            Err(e) => {
                log::error!("{}: {e}", path.display());
                failures += 1;
            }
        }
    }
    match failures {
        0 => Ok(()),
        n => Err(format!("{n} of {} files could not be read", files.len()).into()),
    }
}

fn info(files: &[PathBuf]) -> CliResult {
    for_each_file(files, summarize_capture, |summary| println!("{summary}"))
}

fn check(files: &[PathBuf]) -> CliResult {
    for_each_file(files, check_capture, |report| println!("{report}"))
}

fn fix(input: &Path, output: &Path) -> CliResult {
    let report = repair_capture(input, output)?;
    log::info!(
        "Filled {} gaps with {} synthetic packets ({} left in place)",
        report.filled,
        report.inserted,
        report.skipped
    );
    Ok(())
}

fn list(path: &Path, key: Option<&String>, as_json: bool) -> CliResult {
    let dataset = open(path)?;
    let indices: Vec<usize> = match key {
        Some(key) => dataset.lookup_all(ChannelKey::parse(key))?,
        None => (0..dataset.len()).collect(),
    };
    let infos: Vec<_> = indices
        .iter()
        .filter_map(|idx| dataset.info_at(*idx))
        .collect();

    if as_json {
        println!("{}", serde_json::to_string_pretty(&infos)?);
        return Ok(());
    }
    println!("{} ({:?}, {} channels)", path.display(), dataset.backend(), dataset.len());
    for (idx, info) in indices.iter().zip(infos) {
        println!(
            "{idx:4} {:<32} {:<24} [{}] d{}={} {}",
            info.id1(),
            info.label,
            info.unit,
            info.abscissa.label,
            info.abscissa.inc,
            info.abscissa.unit
        );
    }
    Ok(())
}

/// Text for the third ID line of an exported channel
fn start_id(dataset: &DataSource) -> Option<String> {
    match dataset {
        DataSource::Raw(raw) => Some(format_epoch(raw.start_time())),
        DataSource::Session(session) => Some(session.manifest().acquisition_id.clone()),
        DataSource::Uff(_) => None,
    }
}

fn export(path: &Path, output: &Path, matches: &ArgMatches) -> CliResult {
    let dataset = open(path)?;
    let key = matches
        .get_one::<String>("key")
        .map(|key| ChannelKey::parse(key))
        .unwrap_or_else(|| ChannelKey::from("*"));
    let factor = matches.get_one::<usize>("decimate").copied().unwrap_or(1);
    let window = (
        matches.get_one::<f64>("start").copied(),
        matches.get_one::<f64>("end").copied(),
    );
    let start_id = start_id(&dataset);

    let indices = dataset.lookup_all(&key)?;
    if indices.is_empty() {
        return Err(format!("No channels match {key}").into());
    }
    let mut writer = UffWriter::new(BufWriter::new(File::create(output)?));
    for (node, idx) in indices.into_iter().enumerate() {
        let mut channel = dataset.read_at(idx)?;
        if let (Some(start), Some(end)) = window {
            channel = channel.slice(start, end)?;
        }
        if factor > 1 {
            channel = channel.decimate(factor)?;
        }
        if let Some(id) = &start_id {
            let mut info = channel.info().clone();
            info.ids[2] = id.clone();
            channel = DataChannel::new(channel.into_values(), info);
        }
        log::info!(
            "Writing {} ({} points) to {}",
            channel.info().id1(),
            channel.len(),
            output.display()
        );
        writer.write_channel(&channel, node as i64 + 1)?;
    }
    writer.into_inner().flush()?;
    Ok(())
}

fn scale(manifest_path: &Path, output_dir: &Path) -> CliResult {
    let manifest = Manifest::read(manifest_path)?;
    for chassis in manifest.chassis_numbers() {
        let scale_path = output_dir.join(format!("scale-chassis{chassis}.txt"));
        manifest.scale_calibration(chassis).write_file(&scale_path)?;
        log::info!(
            "Wrote scale for chassis {chassis} to {}",
            scale_path.display()
        );
    }
    Ok(())
}

fn main() -> ExitCode {
    // Create a cli
    let matches = Command::new("quartz_cli")
        .arg_required_else_help(true)
        .subcommand(
            Command::new("new")
                .about("Make a template configuration yaml file")
                .arg(path_arg()),
        )
        .subcommand(
            Command::new("convert")
                .about("Convert the capture files named by a configuration file")
                .arg(path_arg()),
        )
        .subcommand(
            Command::new("info")
                .about("Summarize the first packets of capture files")
                .arg(files_arg()),
        )
        .subcommand(
            Command::new("check")
                .about("Report packet sequence gaps in capture files")
                .arg(files_arg()),
        )
        .subcommand(
            Command::new("fix")
                .about("Copy a capture file, filling sequence gaps with placeholder packets")
                .arg(Arg::new("input").required(true))
                .arg(Arg::new("output").required(true)),
        )
        .subcommand(
            Command::new("list")
                .about("List the channels of a capture file, acquisition or UFF archive")
                .arg(Arg::new("file").required(true))
                .arg(
                    Arg::new("key")
                        .short('k')
                        .long("key")
                        .help("Channel index or ID pattern"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Print channel metadata as JSON"),
                ),
        )
        .subcommand(
            Command::new("export")
                .about("Write channels of any dataset to a UFF58 archive")
                .arg(Arg::new("file").required(true))
                .arg(Arg::new("output").required(true))
                .arg(
                    Arg::new("key")
                        .short('k')
                        .long("key")
                        .help("Channel index or ID pattern; every channel if omitted"),
                )
                .arg(
                    Arg::new("decimate")
                        .short('d')
                        .long("decimate")
                        .value_parser(clap::value_parser!(usize))
                        .help("Low pass and keep every Nth sample"),
                )
                .arg(
                    Arg::new("start")
                        .long("start")
                        .requires("end")
                        .value_parser(clap::value_parser!(f64))
                        .help("Start of the exported abscissa window"),
                )
                .arg(
                    Arg::new("end")
                        .long("end")
                        .requires("start")
                        .value_parser(clap::value_parser!(f64))
                        .help("End of the exported abscissa window"),
                ),
        )
        .subcommand(
            Command::new("scale")
                .about("Write a scale file per chassis from an acquisition manifest")
                .arg(Arg::new("manifest").required(true))
                .arg(Arg::new("output_dir").default_value(".")),
        )
        .get_matches();

    // Initialize feedback
    let logger = simplelog::TermLogger::new(
        simplelog::LevelFilter::Info,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );

    let pb_manager = MultiProgress::new();

    LogWrapper::new(pb_manager.clone(), logger)
        .try_init()
        .expect("Could not create logging/progress!");

    // Parse the cli
    let result = match matches.subcommand() {
        Some(("new", sub)) => get_path(sub, "path").and_then(|path| {
            log::info!("Making a template config at {}...", path.to_string_lossy());
            make_template_config(&path)
        }),
        Some(("convert", sub)) => {
            get_path(sub, "path").and_then(|path| convert(&path, &pb_manager))
        }
        Some(("info", sub)) => info(&get_files(sub)),
        Some(("check", sub)) => check(&get_files(sub)),
        Some(("fix", sub)) => get_path(sub, "input")
            .and_then(|input| get_path(sub, "output").and_then(|output| fix(&input, &output))),
        Some(("list", sub)) => get_path(sub, "file").and_then(|file| {
            list(&file, sub.get_one::<String>("key"), sub.get_flag("json"))
        }),
        Some(("export", sub)) => get_path(sub, "file").and_then(|file| {
            get_path(sub, "output").and_then(|output| export(&file, &output, sub))
        }),
        Some(("scale", sub)) => get_path(sub, "manifest").and_then(|manifest| {
            get_path(sub, "output_dir").and_then(|dir| scale(&manifest, &dir))
        }),
        _ => Ok(()),
    };

    match result {
        Ok(()) => {
            log::info!("Done.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
