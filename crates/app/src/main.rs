//! Walnut voice assistant entry point

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use walnut_agent::{ConversationMachine, MachineDeps};
use walnut_alarm::{AlarmScheduler, AlarmStore};
use walnut_audio::{AudioSource, CpalSink, FeedbackPlayer, MusicLibrary, MusicPlayer, PcmSink};
use walnut_config::{load_settings, Settings};
use walnut_core::PerfMonitor;
use walnut_engines::{HttpLlmClient, NullStt, RemoteHealthMonitor};
use walnut_pipeline::{AdaptiveVad, WakeDetector};
use walnut_tts::{warmup_phrases, PhraseCache, TtsDispatcher};

mod cli;

use cli::{Cli, Command};

/// Background tasks get this long to wind down on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

fn main() {
    let cli = Cli::parse();
    let config_path = cli.config.clone();

    let code = match cli.command.unwrap_or(Command::Run) {
        Command::Run => run_daemon(config_path.as_deref()),
        Command::Status => cli::status(config_path.as_deref()),
        Command::Perf => cli::perf(config_path.as_deref()),
        Command::Logs => cli::logs(config_path.as_deref()),
        Command::Config(args) => cli::config(config_path.as_deref(), &args),
        Command::Diag => cli::diag(config_path.as_deref()),
    };
    std::process::exit(code);
}

fn run_daemon(config_path: Option<&Path>) -> i32 {
    let settings = match load_settings(config_path) {
        Ok(settings) => Arc::new(settings),
        Err(e) => {
            eprintln!("configuration error: {e}");
            return 1;
        }
    };

    init_tracing(&settings);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting walnut");

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "failed to build runtime");
            return 1;
        }
    };

    match runtime.block_on(run_assistant(settings)) {
        Ok(()) => 0,
        Err(e) => {
            tracing::error!(error = %e, "fatal error");
            1
        }
    }
}

async fn run_assistant(settings: Arc<Settings>) -> Result<(), Box<dyn std::error::Error>> {
    // Components come up in dependency order: audio first, then the
    // detectors, engines, cache and dispatcher, scheduler, and finally
    // the machine that ties them together.
    let (mut source, frames_rx, mut source_status) = AudioSource::start(&settings.audio)?;
    tracing::info!(device = %settings.audio.input_device, "microphone capture running");

    let speaker: Arc<dyn PcmSink> = Arc::new(CpalSink::open(
        &settings.audio.output_device,
        settings.audio.sample_rate,
    )?);
    let player = Arc::new(FeedbackPlayer::new(
        Arc::clone(&speaker),
        settings.alarm.ringtone_duration_secs,
    ));

    let wake = WakeDetector::from_config(&settings.wakeword);
    let vad = AdaptiveVad::new(settings.audio_quality.vad.clone());

    let stt = Arc::new(NullStt);
    let llm = Arc::new(HttpLlmClient::new(settings.llm.clone())?);

    let cache = if settings.tts.cache.enabled {
        let cache = Arc::new(PhraseCache::open(&settings.tts.cache.cache_dir)?);
        if let Err(e) = cache.evict(settings.tts.cache.max_cache_age_days) {
            tracing::warn!(error = %e, "cache eviction failed");
        }
        Some(cache)
    } else {
        None
    };
    let tts = Arc::new(TtsDispatcher::from_config(
        settings.tts.clone(),
        cache.clone(),
    )?);

    // Health probing keeps dispatcher routing honest about remote tiers.
    let mut health = RemoteHealthMonitor::new(settings.health.clone());
    if !settings.tts.remote.base_url.is_empty() {
        health.register(
            tts.remote_availability(),
            format!("{}/health", settings.tts.remote.base_url.trim_end_matches('/')),
        );
    }
    if !settings.tts.streaming.url.is_empty() {
        let probe = settings
            .tts
            .streaming
            .url
            .replacen("wss://", "https://", 1)
            .replacen("ws://", "http://", 1);
        health.register(tts.streaming_availability(), format!("{probe}/health"));
    }
    let health_handle = health.spawn();

    // Warm-up runs behind the scenes; first wake never waits on it.
    let mut warmup_handle = None;
    if settings.tts.cache.enabled && settings.tts.cache.warmup_on_startup {
        let tts = Arc::clone(&tts);
        let phrases = warmup_phrases(&settings);
        warmup_handle = Some(tokio::spawn(async move {
            tts.warm_up(&phrases).await;
        }));
    }

    let music = if settings.music.enabled {
        let library = MusicLibrary::scan(&settings.music.library_path);
        let sink: Arc<dyn PcmSink> = Arc::new(CpalSink::open(
            &settings.audio.output_device,
            settings.audio.sample_rate,
        )?);
        Some(Arc::new(MusicPlayer::new(
            library,
            sink,
            settings.music.initial_volume,
        )))
    } else {
        None
    };

    let mut scheduler_handle = None;
    let alarms = if settings.alarm.enabled {
        let store = Arc::new(AlarmStore::open(&settings.alarm.storage_path)?);
        let scheduler = AlarmScheduler::new(Arc::clone(&store), settings.alarm.clone());
        let (fire_rx, handle) = scheduler.spawn();
        scheduler_handle = Some(handle);
        Some((store, fire_rx))
    } else {
        None
    };

    let perf = Arc::new(PerfMonitor::new());
    let perf_handle = tokio::spawn(dump_perf_loop(Arc::clone(&perf)));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let mut machine = ConversationMachine::new(MachineDeps {
        settings: Arc::clone(&settings),
        frames: frames_rx,
        wake,
        vad,
        stt,
        llm,
        tts: Arc::clone(&tts),
        player: Arc::clone(&player),
        music,
        switch: None,
        alarms,
        perf,
        shutdown: shutdown_rx,
    });

    let machine_handle = tokio::spawn(async move {
        machine.run().await;
    });

    // Run until a signal or a fatal audio error.
    tokio::select! {
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received");
        }
        err = source_status.recv() => {
            if let Some(err) = err {
                tracing::error!(error = %err, "audio capture failed permanently");
            }
        }
    }

    // Orderly teardown: stop the machine, give background tasks a
    // grace period, drain cache writes, close the devices.
    let _ = shutdown_tx.send(true);
    if tokio::time::timeout(SHUTDOWN_GRACE * 5, machine_handle).await.is_err() {
        tracing::warn!("machine did not stop in time");
    }

    for handle in [Some(health_handle), warmup_handle, scheduler_handle, Some(perf_handle)]
        .into_iter()
        .flatten()
    {
        handle.abort();
        let _ = tokio::time::timeout(SHUTDOWN_GRACE, handle).await;
    }

    if let Some(cache) = &cache {
        if let Err(e) = cache.flush() {
            tracing::warn!(error = %e, "cache flush failed during shutdown");
        }
    }

    player.stop().await;
    source.stop();
    tracing::info!("walnut stopped");
    Ok(())
}

async fn dump_perf_loop(perf: Arc<PerfMonitor>) {
    let mut ticker = tokio::time::interval(Duration::from_secs(30));
    loop {
        ticker.tick().await;
        cli::dump_perf_snapshot(&perf);
    }
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

fn init_tracing(settings: &Settings) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("walnut={}", settings.observability.log_level).into());

    let fmt_layer = if settings.observability.log_json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
