use anyhow::Result;
use rpicamd::{
    config::{Config, LifecycleConfig},
    daemon::{CameraService, DaemonStatus, LifecycleError, ProcessLifecycleManager, StopOutcome},
};

/// Start the daemon, detaching unless `--foreground` was given
pub fn start(lifecycle: LifecycleConfig, config: Config) -> Result<()> {
    let (manager, config) = prepare(lifecycle, config)?;
    run(&manager, config)
}

/// Stop the daemon if it is running. Does not wait for it to exit.
pub fn stop(lifecycle: LifecycleConfig) -> Result<()> {
    let manager = ProcessLifecycleManager::new(lifecycle);
    signal_stop(&manager)
}

/// Stop, then start immediately. The new instance waits on the PID lock
/// while the old one shuts down.
pub fn restart(lifecycle: LifecycleConfig, config: Config) -> Result<()> {
    let (manager, config) = prepare(lifecycle, config)?;
    signal_stop(&manager)?;
    run(&manager, config)
}

/// Print whether the daemon is running
pub fn status(lifecycle: LifecycleConfig) {
    let manager = ProcessLifecycleManager::new(lifecycle);
    let config = manager.config();

    match manager.status() {
        DaemonStatus {
            running: true,
            pid: Some(pid),
        } => {
            println!("{}: running, PID = {}", config.name, pid);
            if config.verbose {
                println!("{}: Working directory: {}", config.name, config.working_directory.display());
                println!("{}: PID file: {}", config.name, config.pid_file.display());
                println!("{}: Log file: {}", config.name, config.log_file.display());
                if config.stdout_file != config.log_file {
                    println!("{}: Stdout file: {}", config.name, config.stdout_file.display());
                }
                if config.stderr_file != config.log_file {
                    println!("{}: Stderr file: {}", config.name, config.stderr_file.display());
                }
            }
        }
        _ => println!("{}: NOT running", config.name),
    }
}

fn prepare(lifecycle: LifecycleConfig, mut config: Config) -> Result<(ProcessLifecycleManager, Config)> {
    config.camera.recording_dir = std::path::absolute(&config.camera.recording_dir)?;
    let manager = ProcessLifecycleManager::new(lifecycle.absolutize()?);
    Ok((manager, config))
}

fn signal_stop(manager: &ProcessLifecycleManager) -> Result<()> {
    let config = manager.config();
    if config.verbose {
        println!("{}: stopping...", config.name);
    }

    match manager.stop()? {
        StopOutcome::Signalled(pid) => {
            if config.verbose {
                println!("{}: sent SIGTERM to PID {}", config.name, pid);
            }
        }
        StopOutcome::NotRunning => println!("{}: NOT running", config.name),
    }
    Ok(())
}

fn run(manager: &ProcessLifecycleManager, config: Config) -> Result<()> {
    let lifecycle = manager.config();
    if lifecycle.verbose {
        println!("{}: starting...", lifecycle.name);
        println!("{}: PID file = {}", lifecycle.name, lifecycle.pid_file.display());
        println!("{}: Log file = {}", lifecycle.name, lifecycle.log_file.display());
    }

    if let Err(e) = manager.start(CameraService::new(config)) {
        if let LifecycleError::AlreadyRunning { pid: Some(pid), .. } = &e {
            println!("{}: cannot start, already running with PID = {}", lifecycle.name, pid);
        }
        anyhow::bail!("{}: {}", lifecycle.name, e);
    }
    Ok(())
}
