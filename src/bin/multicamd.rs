//! multicamd - run the multi-camera pipeline headless and manage profiles

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::time::{Duration, Instant};

use multicam::{
    list_available_sources, CameraConfig, CameraId, DetectorRegistry, FeedBoard, Frame,
    FrameSink, JsonProfileStore, MulticamConfig, ProfileStore, SourceId, StopFlag, Supervisor,
};

const STATUS_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start cameras and drain their output until Ctrl-C or --seconds.
    Run(RunArgs),
    /// List capture sources that look available.
    Sources,
    /// List detection model names (built-in and configured).
    Models,
    /// Inspect stored profiles.
    Profiles {
        #[command(subcommand)]
        command: ProfileCommand,
    },
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Load cameras from this profile.
    #[arg(long, env = "MULTICAM_PROFILE")]
    profile: Option<String>,
    /// Add a camera on this source (device index or URI).
    #[arg(long)]
    source: Option<String>,
    /// Detection model for --source.
    #[arg(long, default_value = "stub")]
    model: String,
    /// Comma-separated labels to keep for --source (empty keeps all).
    #[arg(long, value_delimiter = ',')]
    classes: Vec<String>,
    /// Enable face detection for --source.
    #[arg(long)]
    faces: bool,
    /// Stop after this many seconds.
    #[arg(long)]
    seconds: Option<u64>,
    /// Save the started cameras as a profile.
    #[arg(long)]
    save_profile: Option<String>,
}

#[derive(Subcommand, Debug)]
enum ProfileCommand {
    List,
    Show { name: String },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let config = MulticamConfig::load()?;
    let store = JsonProfileStore::new(config.profiles_dir.clone());

    match args.command {
        Command::Run(run) => run_cameras(&config, &store, run),
        Command::Sources => {
            let sources = list_available_sources();
            if sources.is_empty() {
                println!("no capture sources found");
            }
            for source in sources {
                println!("{}", source);
            }
            Ok(())
        }
        Command::Models => {
            for name in DetectorRegistry::with_models(&config.models).models() {
                println!("{}", name);
            }
            Ok(())
        }
        Command::Profiles { command } => match command {
            ProfileCommand::List => {
                for name in store.list_profiles()? {
                    println!("{}", name);
                }
                Ok(())
            }
            ProfileCommand::Show { name } => {
                let configs = store
                    .load_profile(&name)?
                    .ok_or_else(|| anyhow!("profile '{}' not found", name))?;
                println!("{}", serde_json::to_string_pretty(&configs)?);
                Ok(())
            }
        },
    }
}

fn run_cameras(config: &MulticamConfig, store: &JsonProfileStore, args: RunArgs) -> Result<()> {
    let mut cameras = Vec::new();
    if let Some(name) = args.profile.as_deref() {
        let configs = store
            .load_profile(name)?
            .ok_or_else(|| anyhow!("profile '{}' not found", name))?;
        log::info!("loaded profile {} ({} cameras)", name, configs.len());
        cameras.extend(configs);
    }
    if let Some(source) = args.source.as_deref() {
        let source: SourceId = source.parse().context("invalid --source")?;
        cameras.push(
            CameraConfig::new(source, args.model.clone())
                .with_target_classes(args.classes.iter().filter(|c| !c.trim().is_empty()).cloned())
                .with_face_detection(args.faces),
        );
    }
    if cameras.is_empty() {
        return Err(anyhow!("nothing to run: pass --profile and/or --source"));
    }

    let stop = StopFlag::new();
    let handler_stop = stop.clone();
    ctrlc::set_handler(move || handler_stop.raise()).context("error setting Ctrl-C handler")?;
    if let Some(seconds) = args.seconds {
        let timer_stop = stop.clone();
        std::thread::Builder::new()
            .name("run-timer".to_string())
            .spawn(move || {
                std::thread::sleep(Duration::from_secs(seconds));
                timer_stop.raise();
            })
            .context("failed to spawn run timer")?;
    }

    let mut supervisor = Supervisor::new(
        config.supervisor_settings(),
        DetectorRegistry::with_models(&config.models),
    );
    let mut status = StatusLog::new();
    for camera in cameras {
        let id = supervisor.add_camera(camera)?;
        status.board.register(id);
    }
    if let Some(name) = args.save_profile.as_deref() {
        store.save_profile(name, &supervisor.camera_configs())?;
    }

    log::info!("multicamd running; Ctrl-C to stop");
    supervisor.run(&mut status, &stop);
    log::info!("feeds:\n{}", status.board.render());
    Ok(())
}

/// Feed board that logs its status lines every `STATUS_INTERVAL`.
struct StatusLog {
    board: FeedBoard,
    next_status: Instant,
}

impl StatusLog {
    fn new() -> Self {
        Self {
            board: FeedBoard::new(),
            next_status: Instant::now() + STATUS_INTERVAL,
        }
    }
}

impl FrameSink for StatusLog {
    fn on_frame(&mut self, camera_id: CameraId, frame: Option<&Frame>) {
        self.board.on_frame(camera_id, frame);
    }

    fn tick(&mut self) {
        if Instant::now() >= self.next_status {
            log::info!("feeds:\n{}", self.board.render());
            self.next_status += STATUS_INTERVAL;
        }
    }
}
