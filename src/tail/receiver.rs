// SPDX-License-Identifier: Apache-2.0

//! Public lifecycle of the tail receiver: configure, start, shut down.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::tail::config::TailReceiverConfig;
use crate::tail::error::{Error, Result};
use crate::tail::parser::build_parser;
use crate::tail::position::PositionStore;
use crate::tail::reactor::{Reactor, ReactorHandle, ReactorTimers, ShutdownStep};
use crate::tail::reconciler::Reconciler;
use crate::tail::sink::{EventSink, LineRouter, LineSink};
use crate::tail::tag::TagResolver;

/// Tails every file matching the configured templates and hands their lines to a sink.
pub struct TailReceiver {
    config: TailReceiverConfig,
    positions: Option<PositionStore>,
    reconciler: Option<Reconciler>,
    reactor: Option<ReactorHandle>,
}

impl TailReceiver {
    /// Validate the configuration and open the position store. Nothing is
    /// watched until [`TailReceiver::start`].
    pub fn new(config: TailReceiverConfig, sink: Arc<dyn LineSink>) -> Result<Self> {
        config.validate()?;

        let positions = match &config.pos_file {
            Some(path) => Some(PositionStore::open(path)?),
            None => None,
        };

        let reconciler = Reconciler::from_config(&config, positions.clone(), sink)?;

        Ok(Self {
            config,
            positions,
            reconciler: Some(reconciler),
            reactor: None,
        })
    }

    /// Build a receiver that parses and tags lines per `config` before emitting them.
    pub fn with_event_sink(config: TailReceiverConfig, events: Box<dyn EventSink>) -> Result<Self> {
        let parser = build_parser(config.parser, config.regex_pattern.as_deref())?;
        let tag = TagResolver::new(&config.tag)?;
        let router = LineRouter::new(parser, tag, config.path_key.clone(), events);
        Self::new(config, Arc::new(router))
    }

    pub fn config(&self) -> &TailReceiverConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.reactor.is_some()
    }

    /// Run the first refresh on the calling thread, then hand the watch set to
    /// the reactor thread.
    pub fn start(&mut self) -> Result<()> {
        let Some(mut reconciler) = self.reconciler.take() else {
            return Err(Error::Reactor("receiver already started".to_string()));
        };

        let stats = reconciler.refresh();
        info!(
            watching = reconciler.len(),
            started = stats.started,
            "Starting tail receiver"
        );

        let timers = ReactorTimers {
            refresh_interval: self.config.refresh_interval,
            poll_interval: self.config.poll_interval,
            position_sync_interval: self.config.position_sync_interval,
        };
        self.reactor = Some(Reactor::new(reconciler, timers).spawn()?);
        Ok(())
    }

    /// Stop the reactor, join its thread and close the position store.
    /// Returns the completed steps in order.
    pub fn shutdown(&mut self) -> Result<Vec<ShutdownStep>> {
        let mut steps = match self.reactor.take() {
            Some(reactor) => reactor.stop()?,
            None => Vec::new(),
        };

        // Never started: nothing was watched, nothing is open
        self.reconciler = None;

        if let Some(positions) = self.positions.take() {
            positions.close()?;
            steps.push(ShutdownStep::PositionStoreClosed);
        }

        for step in &steps {
            debug!(step = %step, "Shutdown step completed");
        }
        info!("Tail receiver stopped");
        Ok(steps)
    }
}

impl Drop for TailReceiver {
    fn drop(&mut self) {
        if self.reactor.is_some() || self.positions.is_some() {
            if let Err(e) = self.shutdown() {
                warn!("Error shutting down tail receiver: {}", e);
            }
        }
    }
}
