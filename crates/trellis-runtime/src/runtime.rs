//! Runtime orchestration.
//!
//! [`AppRuntime`] ties the runtime settings, the logging subscriber, the
//! shared workers and one [`AppManager`] together.
//!
//! ```rust,ignore
//! use trellis_runtime::AppRuntime;
//!
//! // Loads trellis.toml from the current directory
//! let runtime = AppRuntime::new();
//! runtime.run().await?;
//!
//! let runtime = AppRuntime::builder()
//!     .config_file("config/trellis.toml")
//!     .profile("production")
//!     .build()?;
//! ```

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::signal;
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use trellis_core::ActiveWorkers;
use trellis_framework::AppContext;

use crate::app::{AppManager, AppState};
use crate::config::{
    ConfigLoader, RuntimeConfigError, RuntimeConfigResult, TrellisConfig, validate_config,
};
use crate::error::{RuntimeError, RuntimeResult};
use crate::logging;

/// Runs one application.
pub struct AppRuntime {
    config: TrellisConfig,
    context: Arc<AppContext>,
    manager: Arc<Mutex<AppManager>>,
    running: Arc<RwLock<bool>>,
}

impl AppRuntime {
    /// Creates a runtime from `trellis.toml` in the current directory, or
    /// from defaults when none is found.
    pub fn new() -> Self {
        let config = ConfigLoader::new()
            .with_current_dir()
            .load()
            .unwrap_or_else(|e| {
                eprintln!("Warning: Failed to load config ({e}), using defaults");
                TrellisConfig::default()
            });

        Self::from_config(&config)
    }

    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Creates a runtime from loaded settings.
    ///
    /// Installs the logging subscriber if none is set and spawns the
    /// configured workers.
    pub fn from_config(config: &TrellisConfig) -> Self {
        logging::init_from_config(&config.logging);

        let workers = Arc::new(ActiveWorkers::new());
        for name in &config.workers {
            if let Err(e) = workers.get_or_create(name) {
                error!(worker = %name, error = %e, "Failed to spawn worker");
            }
        }
        let context = Arc::new(AppContext::with_workers(workers));
        let manager = AppManager::new(config.app.id.clone(), Arc::clone(&context));

        info!(
            app = %config.app.id,
            log_level = %config.logging.level,
            workers = config.workers.len(),
            "Runtime initialized from configuration"
        );

        Self {
            config: config.clone(),
            context,
            manager: Arc::new(Mutex::new(manager)),
            running: Arc::new(RwLock::new(false)),
        }
    }

    pub fn config(&self) -> &TrellisConfig {
        &self.config
    }

    pub fn context(&self) -> &Arc<AppContext> {
        &self.context
    }

    pub fn app_state(&self) -> AppState {
        self.manager.lock().state()
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    // =========================================================================
    // Application
    // =========================================================================

    /// Sets the application from an XML string.
    ///
    /// # Panics
    ///
    /// Panics if the current application is not destroyed.
    pub fn load_app_xml(&self, xml: &str) -> RuntimeResult<()> {
        self.manager
            .lock()
            .load_xml(xml, &self.config.app.parameters)
    }

    /// Sets the application from an XML file.
    pub fn load_app_file(&self, path: impl AsRef<Path>) -> RuntimeResult<()> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(RuntimeConfigError::FileNotFound(path.to_path_buf()).into());
        }
        let xml = std::fs::read_to_string(path).map_err(RuntimeConfigError::from)?;
        info!(path = %path.display(), "Loading application");
        self.load_app_xml(&xml)
    }

    /// Loads `app.file` unless an application is already set.
    pub fn init(&self) -> RuntimeResult<()> {
        if self.manager.lock().has_config() {
            return Ok(());
        }
        match &self.config.app.file {
            Some(path) => self.load_app_file(path),
            None => Err(RuntimeError::NoApplication),
        }
    }

    /// Runs `f` on the manager from the blocking pool, since lifecycle
    /// calls wait on service futures.
    async fn with_manager<R, F>(&self, f: F) -> RuntimeResult<R>
    where
        F: FnOnce(&mut AppManager) -> RuntimeResult<R> + Send + 'static,
        R: Send + 'static,
    {
        let manager = Arc::clone(&self.manager);
        tokio::task::spawn_blocking(move || f(&mut manager.lock())).await?
    }

    /// Creates, starts and updates the application.
    pub async fn start(&self) -> RuntimeResult<()> {
        {
            let mut running = self.running.write().await;
            if *running {
                warn!("Runtime is already running");
                return Ok(());
            }
            *running = true;
        }

        info!(app = %self.config.app.id, "Starting Trellis runtime");
        let launched = self.with_manager(AppManager::launch).await;
        if let Err(e) = &launched {
            error!(app = %self.config.app.id, error = %e, "Failed to launch application");
        }
        launched
    }

    /// Stops and destroys the application, then stops the workers.
    pub async fn stop(&self) -> RuntimeResult<()> {
        {
            let mut running = self.running.write().await;
            if !*running {
                warn!("Runtime is not running");
                return Ok(());
            }
            *running = false;
        }

        info!(app = %self.config.app.id, "Stopping Trellis runtime");
        let stopped = self.with_manager(AppManager::stop_and_destroy).await;
        self.context.workers().clear();
        info!("Runtime stopped");
        stopped
    }

    /// Runs until Ctrl+C or SIGTERM.
    pub async fn run(&self) -> RuntimeResult<()> {
        self.run_until(wait_for_shutdown()).await
    }

    /// Runs until `shutdown` completes.
    pub async fn run_until<F>(&self, shutdown: F) -> RuntimeResult<()>
    where
        F: std::future::Future<Output = ()>,
    {
        self.init()?;
        if let Err(e) = self.start().await {
            let _ = self.stop().await;
            return Err(e);
        }

        info!("Trellis runtime is now running");
        shutdown.await;

        self.stop().await
    }
}

impl Default for AppRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// Waits for Ctrl+C, or SIGTERM on unix.
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                error!(error = %e, "Failed to register SIGTERM handler");
                if let Err(e) = signal::ctrl_c().await {
                    error!(error = %e, "Failed to listen for Ctrl+C");
                }
                return;
            }
        };

        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(e) => error!(error = %e, "Failed to listen for Ctrl+C"),
        }
    }
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder for an [`AppRuntime`] with custom configuration sources.
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new().with_current_dir(),
        }
    }

    pub fn config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    pub fn with_env(mut self) -> Self {
        self.config_loader = self.config_loader.with_env();
        self
    }

    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    pub fn merge(mut self, config: TrellisConfig) -> Self {
        self.config_loader = self.config_loader.merge(config);
        self
    }

    /// Loads, validates and builds.
    pub fn build(self) -> RuntimeConfigResult<AppRuntime> {
        let config = self.config_loader.load()?;
        validate_config(&config)?;
        Ok(AppRuntime::from_config(&config))
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
