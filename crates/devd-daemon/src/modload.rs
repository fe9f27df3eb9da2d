//! MODALIAS-driven module loading.
//!
//! The engine matches MODALIAS strings against the alias table and hands
//! matching module names to an opaque [`ModuleLoader`]. Two deferral
//! layers exist: while the alias table cannot be read yet, whole modalias
//! strings queue up; and individual modules marked `deferred` in the
//! blacklist wait until boot completes. Both queues drain when coldboot
//! finishes.

use std::io;
use std::path::PathBuf;

use thiserror::Error;
use tracing::{debug, info};

use devd_core::modalias::{AliasMap, BlacklistMap, BlacklistVerdict};

use crate::config::DevdConfig;

/// Opaque module-insertion collaborator (dependency resolution included).
pub trait ModuleLoader {
    /// Inserts `module` with the given option string.
    ///
    /// # Errors
    ///
    /// Whatever the backend reports; the engine logs and moves on to the
    /// next matching alias.
    fn insmod(&mut self, module: &str, options: &str) -> io::Result<()>;
}

/// Loader that only logs. Used when module insertion is handled elsewhere.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullModuleLoader;

impl ModuleLoader for NullModuleLoader {
    fn insmod(&mut self, module: &str, options: &str) -> io::Result<()> {
        debug!(module, options, "module insertion is disabled");
        Ok(())
    }
}

/// Test double recording every insertion request.
#[derive(Debug, Default)]
pub struct RecordingModuleLoader {
    /// `(module, options)` pairs in call order.
    pub loaded: Vec<(String, String)>,
    /// Module names whose insertion should fail.
    pub failing: Vec<String>,
}

impl ModuleLoader for RecordingModuleLoader {
    fn insmod(&mut self, module: &str, options: &str) -> io::Result<()> {
        if self.failing.iter().any(|m| m == module) {
            return Err(io::Error::other(format!("insmod {module} failed")));
        }
        self.loaded.push((module.to_string(), options.to_string()));
        Ok(())
    }
}

/// Outcome of a modalias load pass; carries the status of the last
/// matching alias.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// No alias matched.
    NoMatch,
    /// The module was handed to the loader successfully.
    Loaded,
    /// The loader reported a failure.
    Failed,
    /// Skipped: blacklisted outright.
    Blocked,
    /// Skipped: deferred until boot completes; the caller queues the
    /// modalias.
    Deferred,
}

/// `modprobe` helper failure.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModprobeError {
    /// Only root (the kernel) may request module loads.
    #[error("permission denied: modprobe requires uid 0")]
    PermissionDenied,
    /// No modalias or module name was given.
    #[error("missing module or modalias argument")]
    MissingArgument,
    /// Neither an alias match nor direct insertion worked.
    #[error("could not load module for {0}")]
    LoadFailed(String),
}

/// Alias table, blacklist and deferred queue for one execution context.
#[derive(Debug)]
pub struct ModaliasEngine {
    aliases: AliasMap,
    blacklist: BlacklistMap,
    deferred: Vec<String>,
    alias_path: PathBuf,
    blacklist_path: PathBuf,
    booting_marker: PathBuf,
}

impl ModaliasEngine {
    /// Creates an engine with empty tables; the alias file is read lazily
    /// on the first event.
    #[must_use]
    pub fn new(config: &DevdConfig) -> Self {
        Self {
            aliases: AliasMap::default(),
            blacklist: BlacklistMap::default(),
            deferred: Vec::new(),
            alias_path: config.modules_alias.clone(),
            blacklist_path: config.modules_blacklist.clone(),
            booting_marker: config.booting_marker.clone(),
        }
    }

    /// Whether the boot sentinel is present.
    #[must_use]
    pub fn is_booting(&self) -> bool {
        self.booting_marker.exists()
    }

    /// Modalias strings currently queued for deferred loading.
    #[must_use]
    pub fn deferred_queue(&self) -> &[String] {
        &self.deferred
    }

    /// Reads the alias table on first demand. Success also pulls in the
    /// blacklist and drains whatever queued up while the table was
    /// unavailable.
    pub fn ensure_tables(&mut self, loader: &mut dyn ModuleLoader) {
        if !self.aliases.is_empty() {
            return;
        }
        let text = match std::fs::read_to_string(&self.alias_path) {
            Ok(text) => text,
            Err(err) => {
                debug!(path = %self.alias_path.display(), %err, "modules.alias not readable yet");
                return;
            }
        };
        self.aliases = AliasMap::parse(&text);
        if let Ok(text) = std::fs::read_to_string(&self.blacklist_path) {
            self.blacklist = BlacklistMap::parse(&text);
        }
        self.drain_deferred(loader);
    }

    /// Reacts to an `add` event's MODALIAS.
    pub fn handle_module_loading(&mut self, modalias: Option<&str>, loader: &mut dyn ModuleLoader) {
        self.ensure_tables(loader);

        let Some(modalias) = modalias else { return };

        let need_deferred = self.is_booting();
        if self.aliases.is_empty()
            || self.load_by_modalias(modalias, need_deferred, loader) == LoadOutcome::Deferred
        {
            info!(modalias, "queueing for deferred module loading");
            self.deferred.push(modalias.to_string());
        }
    }

    /// Tries every alias matching `modalias`.
    ///
    /// Blacklisted modules are skipped; `deferred`-marked modules are
    /// skipped only while `need_deferred` holds, and load like any other
    /// module afterwards. Loader failures are non-fatal: another alias may
    /// still match.
    pub fn load_by_modalias(
        &self,
        modalias: &str,
        need_deferred: bool,
        loader: &mut dyn ModuleLoader,
    ) -> LoadOutcome {
        let mut outcome = LoadOutcome::NoMatch;
        for alias in self.aliases.matching(modalias) {
            info!(module = %alias.name, modalias, "trying to load module for uevent");
            match self.blacklist.classify(&alias.name) {
                BlacklistVerdict::Blocked => {
                    info!(module = %alias.name, "module is blacklisted");
                    outcome = LoadOutcome::Blocked;
                }
                BlacklistVerdict::Deferred if need_deferred => {
                    info!(module = %alias.name, "module deferred until boot completes");
                    outcome = LoadOutcome::Deferred;
                }
                BlacklistVerdict::Deferred | BlacklistVerdict::Clear => {
                    match loader.insmod(&alias.name, "") {
                        Ok(()) => {
                            info!(module = %alias.name, "loaded module");
                            outcome = LoadOutcome::Loaded;
                        }
                        Err(err) => {
                            info!(module = %alias.name, %err, "failed to load module; trying other aliases");
                            outcome = LoadOutcome::Failed;
                        }
                    }
                }
            }
        }
        outcome
    }

    /// Retries every queued modalias with boot-complete semantics and
    /// empties the queue. A no-op while the alias table is still empty.
    pub fn drain_deferred(&mut self, loader: &mut dyn ModuleLoader) {
        if self.aliases.is_empty() {
            return;
        }
        for modalias in std::mem::take(&mut self.deferred) {
            debug!(%modalias, "deferred module load");
            self.load_by_modalias(&modalias, false, loader);
        }
    }

    /// The `modprobe` entry point the kernel invokes via
    /// `/proc/sys/kernel/modprobe`.
    ///
    /// Leading `-q`/`--` arguments are skipped. The first remaining
    /// argument is tried as a modalias; when no alias loads it is treated
    /// as a plain module name and inserted directly with the remaining
    /// arguments joined as the option string.
    ///
    /// # Errors
    ///
    /// [`ModprobeError::PermissionDenied`] for non-root callers,
    /// [`ModprobeError::MissingArgument`] without a target, and
    /// [`ModprobeError::LoadFailed`] when the direct insertion also fails.
    pub fn modprobe(
        &mut self,
        args: &[String],
        loader: &mut dyn ModuleLoader,
    ) -> Result<(), ModprobeError> {
        self.modprobe_as(nix::unistd::Uid::current(), args, loader)
    }

    fn modprobe_as(
        &mut self,
        uid: nix::unistd::Uid,
        args: &[String],
        loader: &mut dyn ModuleLoader,
    ) -> Result<(), ModprobeError> {
        if !uid.is_root() {
            return Err(ModprobeError::PermissionDenied);
        }

        let mut args = args;
        while matches!(args.first().map(String::as_str), Some("-q" | "--")) {
            args = &args[1..];
        }
        let Some(target) = args.first() else {
            return Err(ModprobeError::MissingArgument);
        };

        self.ensure_tables(loader);
        info!(%target, "modprobe");

        if self.load_by_modalias(target, false, loader) == LoadOutcome::Loaded {
            return Ok(());
        }

        let options = args[1..].join(" ");
        loader
            .insmod(target, &options)
            .map_err(|_| ModprobeError::LoadFailed(target.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        tmp: TempDir,
        engine: ModaliasEngine,
        loader: RecordingModuleLoader,
    }

    impl Fixture {
        fn new() -> Self {
            let tmp = TempDir::new().unwrap();
            let config = DevdConfig {
                modules_alias: tmp.path().join("modules.alias"),
                modules_blacklist: tmp.path().join("modules.blacklist"),
                booting_marker: tmp.path().join(".booting"),
                ..DevdConfig::default()
            };
            Self {
                engine: ModaliasEngine::new(&config),
                loader: RecordingModuleLoader::default(),
                tmp,
            }
        }

        fn write_aliases(&self, text: &str) {
            fs::write(self.tmp.path().join("modules.alias"), text).unwrap();
        }

        fn write_blacklist(&self, text: &str) {
            fs::write(self.tmp.path().join("modules.blacklist"), text).unwrap();
        }

        fn set_booting(&self, booting: bool) {
            let marker = self.tmp.path().join(".booting");
            if booting {
                fs::write(&marker, b"").unwrap();
            } else {
                let _ = fs::remove_file(&marker);
            }
        }

        fn loaded(&self) -> Vec<&str> {
            self.loader.loaded.iter().map(|(m, _)| m.as_str()).collect()
        }
    }

    #[test]
    fn test_modalias_queued_until_alias_file_appears() {
        let mut fx = Fixture::new();

        // modules.alias is not there yet: the modalias queues up.
        fx.engine.handle_module_loading(Some("acpi:PNP0A03"), &mut fx.loader);
        assert_eq!(fx.engine.deferred_queue(), ["acpi:PNP0A03"]);
        assert!(fx.loaded().is_empty());

        // Once the file shows up, the next event drains the queue.
        fx.write_aliases("alias acpi:PNP0A* pcihost\n");
        fx.engine.handle_module_loading(None, &mut fx.loader);
        assert_eq!(fx.loaded(), ["pcihost"]);
        assert!(fx.engine.deferred_queue().is_empty());
    }

    #[test]
    fn test_blocked_module_never_loads() {
        let mut fx = Fixture::new();
        fx.write_aliases("alias acpi:PNP0A* pcihost\nalias acpi:PNP0A03 pnp_extra\n");
        fx.write_blacklist("blacklist pnp_extra\n");

        fx.engine.handle_module_loading(Some("acpi:PNP0A03"), &mut fx.loader);
        assert_eq!(fx.loaded(), ["pcihost"]);
        assert!(fx.engine.deferred_queue().is_empty());
    }

    #[test]
    fn test_deferred_module_waits_for_boot() {
        let mut fx = Fixture::new();
        fx.write_aliases("alias acpi:PNP0A* pcihost\n");
        fx.write_blacklist("deferred pcihost\n");
        fx.set_booting(true);

        fx.engine.handle_module_loading(Some("acpi:PNP0A03"), &mut fx.loader);
        assert!(fx.loaded().is_empty());
        assert_eq!(fx.engine.deferred_queue(), ["acpi:PNP0A03"]);

        // Boot completes: the drain loads it.
        fx.set_booting(false);
        fx.engine.drain_deferred(&mut fx.loader);
        assert_eq!(fx.loaded(), ["pcihost"]);
        assert!(fx.engine.deferred_queue().is_empty());
    }

    #[test]
    fn test_deferred_module_loads_after_boot_without_queueing() {
        let mut fx = Fixture::new();
        fx.write_aliases("alias acpi:PNP0A* pcihost\n");
        fx.write_blacklist("deferred pcihost\n");
        fx.set_booting(false);

        fx.engine.handle_module_loading(Some("acpi:PNP0A03"), &mut fx.loader);
        assert_eq!(fx.loaded(), ["pcihost"]);
        assert!(fx.engine.deferred_queue().is_empty());
    }

    #[test]
    fn test_insmod_failure_tries_other_aliases() {
        let mut fx = Fixture::new();
        fx.write_aliases("alias usb:v1* broken\nalias usb:v1D6B* hub_driver\n");
        fx.loader.failing.push("broken".to_string());

        let outcome = {
            fx.engine.ensure_tables(&mut fx.loader);
            fx.engine.load_by_modalias("usb:v1D6Bp0001", false, &mut fx.loader)
        };
        assert_eq!(outcome, LoadOutcome::Loaded);
        assert_eq!(fx.loaded(), ["hub_driver"]);
    }

    #[test]
    fn test_no_modalias_is_a_noop() {
        let mut fx = Fixture::new();
        fx.engine.handle_module_loading(None, &mut fx.loader);
        assert!(fx.engine.deferred_queue().is_empty());
    }

    #[test]
    fn test_modprobe_argument_handling() {
        let mut fx = Fixture::new();
        fx.write_aliases("alias acpi:PNP0A* pcihost\n");
        let root = nix::unistd::Uid::from_raw(0);

        let err = fx.engine.modprobe_as(root, &[], &mut fx.loader).unwrap_err();
        assert_eq!(err, ModprobeError::MissingArgument);

        let args = vec!["-q".to_string(), "acpi:PNP0A03".to_string()];
        fx.engine.modprobe_as(root, &args, &mut fx.loader).unwrap();
        assert_eq!(fx.loaded(), ["pcihost"]);
    }

    #[test]
    fn test_modprobe_falls_back_to_module_name() {
        let mut fx = Fixture::new();
        let root = nix::unistd::Uid::from_raw(0);
        let args = vec![
            "dummy_stm".to_string(),
            "stm_name=heartbeat".to_string(),
            "debug=1".to_string(),
        ];
        fx.engine.modprobe_as(root, &args, &mut fx.loader).unwrap();
        assert_eq!(
            fx.loader.loaded,
            vec![("dummy_stm".to_string(), "stm_name=heartbeat debug=1".to_string())]
        );
    }

    #[test]
    fn test_modprobe_rejects_non_root() {
        let mut fx = Fixture::new();
        let user = nix::unistd::Uid::from_raw(1000);
        let args = vec!["pcihost".to_string()];
        let err = fx.engine.modprobe_as(user, &args, &mut fx.loader).unwrap_err();
        assert_eq!(err, ModprobeError::PermissionDenied);
    }
}
