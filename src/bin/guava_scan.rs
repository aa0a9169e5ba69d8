//! guava-scan - detection front-end for images, video clips and cameras
//!
//! Views of the interactive shell: Home (title and sample images), Detection
//! (image / still / video / camera) and History (results of this session).

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use guava_scan::config::AppConfig;
use guava_scan::ingest::{CameraConfig, CameraSource, FrameSource, ImageSource, Upload, VideoSource};
use guava_scan::report::{self, HistoryRow, LegendRow};
use guava_scan::ui::{Ui, UiMode};
use guava_scan::{
    BackendKind, CredentialStore, Detector, FrameResult, LabelDescriptions, RunFlag, Session,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Config file (.toml or .json).
    #[arg(long, env = "GUAVA_SCAN_CONFIG", global = true)]
    config: Option<PathBuf>,
    /// Model file, overriding the config.
    #[arg(long, global = true)]
    model: Option<PathBuf>,
    /// Model backend (tract|scripted), overriding the config.
    #[arg(long, global = true)]
    backend: Option<BackendKind>,
    /// Confidence threshold in [0, 1], overriding the config.
    #[arg(long, global = true)]
    confidence: Option<f32>,
    /// Username, when login is required.
    #[arg(long, env = "GUAVA_SCAN_USER", global = true)]
    user: Option<String>,
    /// Password, when login is required.
    #[arg(long, env = "GUAVA_SCAN_PASSWORD", global = true, hide_env_values = true)]
    password: Option<String>,
    /// UI mode for stderr progress.
    #[arg(long, value_enum, default_value = "auto", value_name = "MODE", global = true)]
    ui: UiMode,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Detect objects in an image (the default image when none is given).
    Detect {
        /// Image to upload (jpg, jpeg or png).
        #[arg(long)]
        image: Option<PathBuf>,
        /// Where to write the annotated image.
        #[arg(long, default_value = "detected.png")]
        out: PathBuf,
        /// Print detections as JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Run detection over a video preset (video_1..) or a clip location.
    Video {
        source: String,
        /// Directory for annotated frames.
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
    /// Poll the camera until Ctrl-C, or take a single still.
    Camera {
        /// Device path, overriding the config.
        #[arg(long)]
        device: Option<String>,
        /// Stop after this many frames.
        #[arg(long)]
        frames: Option<u64>,
        /// Take one snapshot instead of polling.
        #[arg(long)]
        still: bool,
        /// Where to write the annotated still.
        #[arg(long, default_value = "still.png")]
        out: PathBuf,
    },
    /// List the labels the model recognises.
    Labels,
    /// Interactive session with history.
    Shell,
    /// Manage the credential store.
    Users {
        #[command(subcommand)]
        action: UsersCommand,
    },
}

#[derive(Subcommand, Debug)]
enum UsersCommand {
    /// Create the default accounts.
    Init,
    /// Add or update an account.
    Add {
        username: String,
        #[arg(long)]
        password: String,
        #[arg(long)]
        display_name: Option<String>,
    },
    /// Check a password.
    Verify {
        username: String,
        #[arg(long)]
        password: String,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut cfg = AppConfig::load_from(args.config.as_deref())?;
    if let Some(model) = &args.model {
        cfg.model.path = model.clone();
    }
    if let Some(backend) = args.backend {
        cfg.model.backend = backend;
    }
    let ui = Ui::detect(args.ui);

    match &args.command {
        Command::Users { action } => run_users(&cfg, action),
        Command::Labels => {
            let detector = load_detector(&cfg, &ui);
            print_legend(&detector, &cfg);
            Ok(())
        }
        Command::Detect { image, out, json } => {
            let mut session = open_session(&cfg, &ui, &args)?;
            let source = image_source(&cfg, image.as_deref())?;
            session.prepare_image(source)?;
            let result = {
                let _stage = ui.stage("Detect");
                session.run_detection()?
            };
            if *json {
                println!("{}", serde_json::to_string_pretty(&report::detection_rows(result))?);
            } else {
                print!("{}", report::detections_table(&report::detection_rows(result)));
            }
            save_annotated(result, out)
        }
        Command::Video { source, out_dir } => {
            let mut session = open_session(&cfg, &ui, &args)?;
            let flag = install_stop_handler()?;
            let mut video = VideoSource::open(cfg.video(source))?.with_run_flag(flag);
            stream_to(&mut session, &mut video, &ui, source, out_dir.as_deref(), None)
        }
        Command::Camera {
            device,
            frames,
            still,
            out,
        } => {
            let mut session = open_session(&cfg, &ui, &args)?;
            let camera_cfg = CameraConfig {
                device: device.clone().unwrap_or_else(|| cfg.camera.device.clone()),
                ..cfg.camera.clone()
            };
            if *still {
                let result = session.capture_still(CameraSource::still(camera_cfg)?)?;
                print!("{}", report::detections_table(&report::detection_rows(result)));
                return save_annotated(result, out);
            }
            let flag = install_stop_handler()?;
            let name = camera_cfg.device.clone();
            let mut camera = CameraSource::polling(camera_cfg, flag.clone())?;
            let limit = frames.map(|n| (n, flag));
            stream_to(&mut session, &mut camera, &ui, &name, None, limit)
        }
        Command::Shell => {
            let session = open_session(&cfg, &ui, &args)?;
            Shell::new(cfg.clone(), ui, session)?.run()
        }
    }
}

fn load_detector(cfg: &AppConfig, ui: &Ui) -> Detector {
    let _stage = ui.stage("Load model");
    Detector::open(&cfg.model.path, cfg.model.backend, &cfg.detector_options())
}

fn open_session(cfg: &AppConfig, ui: &Ui, args: &Args) -> Result<Session> {
    let detector = load_detector(cfg, ui);
    let mut session = Session::start(detector, cfg)?;
    if let Some(confidence) = args.confidence {
        session.set_threshold(confidence)?;
    }
    if cfg.login_required {
        let (Some(user), Some(password)) = (&args.user, &args.password) else {
            return Err(anyhow!(
                "login required: pass --user and --password (or GUAVA_SCAN_USER / GUAVA_SCAN_PASSWORD)"
            ));
        };
        let store = CredentialStore::open(&cfg.db_path)?;
        if !session.login(&store, user, password)? {
            return Err(anyhow!("invalid username or password"));
        }
    }
    Ok(session)
}

fn image_source(cfg: &AppConfig, image: Option<&Path>) -> Result<ImageSource> {
    match image {
        Some(path) => Ok(ImageSource::from_upload(Upload::from_path(path)?)?),
        None => Ok(ImageSource::from_default(&cfg.default_image)),
    }
}

fn save_annotated(result: &FrameResult, out: &Path) -> Result<()> {
    result.annotated_frame().save(out)?;
    eprintln!("annotated image written to {}", out.display());
    Ok(())
}

/// Ctrl-C clears the returned flag; the running stream stops before its next frame.
fn install_stop_handler() -> Result<RunFlag> {
    let flag = RunFlag::new();
    let handle = flag.clone();
    ctrlc::set_handler(move || {
        log::info!("stop requested");
        handle.stop();
    })
    .context("install Ctrl-C handler")?;
    Ok(flag)
}

fn stream_to<S: FrameSource>(
    session: &mut Session,
    source: &mut S,
    ui: &Ui,
    name: &str,
    out_dir: Option<&Path>,
    limit: Option<(u64, RunFlag)>,
) -> Result<()> {
    if let Some(dir) = out_dir {
        std::fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    }
    let mut progress = ui.frame_progress(name);
    let mut write_error = None;
    let summary = session.stream(source, |result| {
        progress.tick(result.detections().len());
        if let Some(dir) = out_dir {
            let path = dir.join(format!("frame_{:05}.png", progress.frames()));
            if let Err(err) = result.annotated_frame().save(&path) {
                write_error.get_or_insert(err);
            }
        }
        if let Some((max, flag)) = &limit {
            if progress.frames() >= *max {
                flag.stop();
            }
        }
    })?;
    progress.finish();
    if let Some(err) = write_error {
        return Err(err);
    }

    let rows: Vec<Vec<String>> = summary
        .per_label
        .iter()
        .map(|(label, count)| vec![label.clone(), count.to_string()])
        .collect();
    if rows.is_empty() {
        println!("No objects detected in {} frames.", summary.frames);
    } else {
        print!("{}", report::render_table(&["Label", "Detections"], &rows));
    }
    Ok(())
}

fn print_legend(detector: &Detector, cfg: &AppConfig) {
    if let Some(err) = detector.load_error() {
        println!("Model unavailable: {}", err);
        return;
    }
    let descriptions = LabelDescriptions::load_or_empty(&cfg.label_descriptions);
    let rows: Vec<LegendRow> = detector.legend(&descriptions).iter().map(LegendRow::from).collect();
    print!("{}", report::legend_table(&rows));
}

fn run_users(cfg: &AppConfig, action: &UsersCommand) -> Result<()> {
    let store = CredentialStore::open(&cfg.db_path)?;
    match action {
        UsersCommand::Init => {
            let added = store.seed_defaults()?;
            println!(
                "{} default users added to {} ({} total)",
                added,
                cfg.db_path,
                store.user_count()?
            );
        }
        UsersCommand::Add {
            username,
            password,
            display_name,
        } => {
            let display_name = display_name.as_deref().unwrap_or(username);
            store.upsert_user(username, display_name, password)?;
            println!("user {} saved", username);
        }
        UsersCommand::Verify { username, password } => match store.verify(username, password)? {
            Some(display_name) => println!("ok: {}", display_name),
            None => return Err(anyhow!("invalid username or password")),
        },
    }
    Ok(())
}

// ----------------------------------------------------------------------------
// Interactive shell
// ----------------------------------------------------------------------------

/// Shell threshold input: a fraction, or a whole percent in the slider range 10..=100.
/// Anything else is passed through for the session to reject.
fn threshold_input(value: &str) -> Result<f32> {
    let parsed: f32 = value
        .parse()
        .map_err(|_| anyhow!("not a number: {}", value))?;
    if (10.0..=100.0).contains(&parsed) {
        Ok(parsed / 100.0)
    } else {
        Ok(parsed)
    }
}

const SHELL_HELP: &str = "\
commands:
  home                      title and sample images
  login <user> <password>   authenticate
  logout                    sign out and clear history
  theme [dark|light]        show or switch the banner theme
  threshold [value]         show or set confidence (0-1, or 10-100 percent)
  image [path]              prepare an upload (default image without a path)
  run                       detect on the prepared image
  still                     capture and detect one camera frame
  video <preset|path>       stream a clip (Ctrl-C stops)
  camera [frames]           poll the camera (Ctrl-C stops)
  save <path>               write the latest annotated frame
  history                   results of this session, newest first
  labels                    labels the model recognises
  quit                      leave the shell";

struct Shell {
    cfg: AppConfig,
    ui: Ui,
    session: Session,
    active: Arc<Mutex<Option<RunFlag>>>,
}

impl Shell {
    fn new(cfg: AppConfig, ui: Ui, session: Session) -> Result<Self> {
        let active: Arc<Mutex<Option<RunFlag>>> = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&active);
        ctrlc::set_handler(move || {
            let running = slot.lock().ok().and_then(|guard| guard.clone());
            match running {
                Some(flag) => flag.stop(),
                None => std::process::exit(130),
            }
        })
        .context("install Ctrl-C handler")?;
        Ok(Self {
            cfg,
            ui,
            session,
            active,
        })
    }

    fn run(mut self) -> Result<()> {
        self.home();
        let stdin = std::io::stdin();
        let mut lines = stdin.lock().lines();
        loop {
            print!("guava> ");
            std::io::stdout().flush()?;
            let Some(line) = lines.next() else {
                break;
            };
            let line = line?;
            let words: Vec<&str> = line.split_whitespace().collect();
            let Some((&command, rest)) = words.split_first() else {
                continue;
            };
            if matches!(command, "quit" | "exit") {
                break;
            }
            if let Err(err) = self.dispatch(command, rest) {
                println!("error: {:#}", err);
            }
        }
        Ok(())
    }

    fn dispatch(&mut self, command: &str, rest: &[&str]) -> Result<()> {
        match (command, rest) {
            ("help", _) => println!("{}", SHELL_HELP),
            ("home", _) => self.home(),
            ("login", [user, password]) => {
                let store = CredentialStore::open(&self.cfg.db_path)?;
                if self.session.login(&store, user, password)? {
                    println!("welcome, {}", self.session.display_name().unwrap_or(user));
                } else {
                    println!("invalid username or password");
                }
            }
            ("logout", _) => {
                self.session.logout();
                match self.session.display_name() {
                    Some(guest) => println!("history cleared; continuing as {}", guest),
                    None => println!("signed out; history cleared"),
                }
            }
            ("theme", []) => println!("theme: {}", self.cfg.theme.mode_name()),
            ("theme", [mode]) => {
                self.cfg.theme.dark_mode = match *mode {
                    "dark" => true,
                    "light" => false,
                    other => return Err(anyhow!("unknown theme: {} (dark or light)", other)),
                };
                self.home();
            }
            ("threshold", []) => println!("confidence threshold: {:.2}", self.session.threshold()),
            ("threshold", [value]) => {
                self.session.set_threshold(threshold_input(value)?)?;
                println!("confidence threshold: {:.2}", self.session.threshold());
            }
            ("image", args) => {
                let source = image_source(&self.cfg, args.first().map(Path::new))?;
                let frame = self.session.prepare_image(source)?;
                println!(
                    "image ready ({}x{}); type `run` to detect",
                    frame.width(),
                    frame.height()
                );
            }
            ("run", _) => {
                let result = self.session.run_detection()?;
                print!("{}", report::detections_table(&report::detection_rows(result)));
            }
            ("still", _) => {
                let source = CameraSource::still(self.cfg.camera.clone())?;
                let result = self.session.capture_still(source)?;
                print!("{}", report::detections_table(&report::detection_rows(result)));
            }
            ("video", [name]) => {
                let flag = self.arm();
                let mut video = VideoSource::open(self.cfg.video(name))?.with_run_flag(flag);
                let outcome = stream_to(&mut self.session, &mut video, &self.ui, name, None, None);
                self.disarm();
                outcome?;
            }
            ("camera", args) => {
                let limit = match args.first() {
                    Some(n) => Some(
                        n.parse::<u64>()
                            .map_err(|_| anyhow!("not a frame count: {}", n))?,
                    ),
                    None => None,
                };
                let flag = self.arm();
                let device = self.cfg.camera.device.clone();
                let outcome = CameraSource::polling(self.cfg.camera.clone(), flag.clone())
                    .map_err(anyhow::Error::from)
                    .and_then(|mut camera| {
                        stream_to(
                            &mut self.session,
                            &mut camera,
                            &self.ui,
                            &device,
                            None,
                            limit.map(|n| (n, flag)),
                        )
                    });
                self.disarm();
                outcome?;
            }
            ("save", [path]) => {
                let result = self
                    .session
                    .current()
                    .ok_or_else(|| anyhow!("nothing detected yet"))?;
                save_annotated(result, Path::new(path))?;
            }
            ("history", _) => {
                let rows: Vec<HistoryRow> = self
                    .session
                    .history()
                    .list_recent()
                    .into_iter()
                    .map(HistoryRow::from)
                    .collect();
                print!("{}", report::history_table(&rows));
            }
            ("labels", _) => print_legend(self.session.detector(), &self.cfg),
            _ => println!("unknown command `{}`; type `help`", command),
        }
        Ok(())
    }

    fn home(&self) {
        println!("{}", self.cfg.theme.banner(self.ui.is_pretty()));
        println!("{}", "=".repeat(self.cfg.theme.title.chars().count() + 2));
        println!("default image:  {}", self.cfg.default_image.display());
        println!("detected image: {}", self.cfg.default_detect_image.display());
        match self.session.display_name() {
            Some(name) => println!("signed in as {}", name),
            None => println!("not signed in; use `login <user> <password>`"),
        }
        if let Some(err) = self.session.detector().load_error() {
            println!("detection disabled: {}", err);
        }
        println!("type `help` for commands");
    }

    /// Fresh run flag for the next stream, reachable from the Ctrl-C handler.
    fn arm(&self) -> RunFlag {
        let flag = RunFlag::new();
        if let Ok(mut slot) = self.active.lock() {
            *slot = Some(flag.clone());
        }
        flag
    }

    fn disarm(&self) {
        if let Ok(mut slot) = self.active.lock() {
            *slot = None;
        }
    }
}
