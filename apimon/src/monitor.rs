//! Attach-time context
//!
//! A [`Monitor`] owns everything the canonicalizers share: the alias table,
//! the buffer pool, the ignore policy, the platform capabilities and the
//! diagnostic sink. It is built once when the agent attaches and handed out
//! by reference afterwards.

use std::sync::Arc;

use log::info;

use crate::config::MonitorConfig;
use crate::diagnostics::DiagnosticSink;
use crate::domain::AliasError;
use crate::paths::{AliasTable, IgnorePolicy, PathCanonicalizer, PrefixIgnorePolicy};
use crate::platform::{DosDevices, KeyNames, ObjectNames, PathResolver, ProcessMemory};
use crate::pool::BufferPool;
use crate::registry::RegistryKeyCanonicalizer;
use crate::stack::{StackWalker, Unwinder};
use crate::symbolization::SymbolResolver;

pub struct Monitor<P> {
    config: MonitorConfig,
    aliases: AliasTable,
    pool: BufferPool,
    ignore: Box<dyn IgnorePolicy>,
    platform: P,
    sink: Arc<dyn DiagnosticSink>,
}

impl<P: DosDevices> Monitor<P> {
    /// Build the shared state.
    ///
    /// An invalid configuration or an overflowing alias table is
    /// unrecoverable and goes to the sink's [`DiagnosticSink::fatal`].
    pub fn attach(config: MonitorConfig, platform: P, sink: Arc<dyn DiagnosticSink>) -> Self {
        if let Err(e) = config.validate() {
            sink.fatal(format_args!("{e}"));
        }
        let aliases = match build_aliases(&config, &platform) {
            Ok(aliases) => aliases,
            Err(e) => sink.fatal(format_args!("{e}")),
        };
        let pool = BufferPool::with_limits(config.slots_per_thread, apimon_common::MAX_PATH_W, sink.clone());
        let ignore = Box::new(PrefixIgnorePolicy::new(&config.ignored_prefixes));
        info!("Attached with {} path aliases", aliases.len());
        Self { config, aliases, pool, ignore, platform, sink }
    }
}

fn build_aliases<P: DosDevices>(config: &MonitorConfig, platform: &P) -> Result<AliasTable, AliasError> {
    let mut aliases = AliasTable::from_dos_devices(&config.system_root_dir(), platform)?;
    for rule in &config.aliases {
        aliases.register_str(&rule.pattern, &rule.replacement)?;
    }
    Ok(aliases)
}

impl<P> Monitor<P> {
    /// Replace the ignore policy built from the configuration.
    #[must_use]
    pub fn with_ignore_policy(mut self, policy: Box<dyn IgnorePolicy>) -> Self {
        self.ignore = policy;
        self
    }

    #[must_use]
    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    #[must_use]
    pub fn aliases(&self) -> &AliasTable {
        &self.aliases
    }

    #[must_use]
    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    #[must_use]
    pub fn platform(&self) -> &P {
        &self.platform
    }

    #[must_use]
    pub fn sink(&self) -> &dyn DiagnosticSink {
        self.sink.as_ref()
    }
}

impl<P: PathResolver + ObjectNames> Monitor<P> {
    #[must_use]
    pub fn paths(&self) -> PathCanonicalizer<'_, P> {
        PathCanonicalizer::new(&self.aliases, &self.pool, &self.platform, self.ignore.as_ref())
    }
}

impl<P: KeyNames> Monitor<P> {
    #[must_use]
    pub fn registry(&self) -> RegistryKeyCanonicalizer<'_, P> {
        RegistryKeyCanonicalizer::new(&self.pool, &self.platform, self.sink.as_ref())
    }
}

impl<P: ProcessMemory> Monitor<P> {
    #[must_use]
    pub fn symbols(&self) -> SymbolResolver<'_, P> {
        SymbolResolver::new(&self.platform)
    }
}

impl<P: Unwinder> Monitor<P> {
    #[must_use]
    pub fn stack(&self) -> StackWalker<'_, P> {
        StackWalker::new(&self.platform)
    }

    /// Capture the calling thread's return addresses, up to
    /// `max_stack_frames`.
    #[must_use]
    pub fn capture_stack(&self) -> Vec<usize> {
        let mut frames = vec![0usize; self.config.max_stack_frames];
        let count = self.stack().walk(None, &mut frames, self.config.max_stack_frames);
        frames.truncate(count);
        frames
    }
}

#[cfg(windows)]
mod global {
    use std::sync::{Arc, OnceLock};

    use super::Monitor;
    use crate::config::MonitorConfig;
    use crate::diagnostics::LogSink;
    use crate::platform::WindowsPlatform;

    static MONITOR: OnceLock<Monitor<WindowsPlatform>> = OnceLock::new();

    /// Install the process-wide monitor. Later calls return the existing
    /// instance and ignore `config`.
    pub fn attach(config: MonitorConfig) -> &'static Monitor<WindowsPlatform> {
        MONITOR.get_or_init(|| Monitor::attach(config, WindowsPlatform::new(), Arc::new(LogSink)))
    }

    /// The process-wide monitor, once [`attach`] has run.
    pub fn monitor() -> Option<&'static Monitor<WindowsPlatform>> {
        MONITOR.get()
    }
}

#[cfg(windows)]
pub use global::{attach, monitor};
