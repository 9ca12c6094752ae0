// MIT License - Copyright (c) 2026 Peter Wright
// Scenario engine: home mode transitions to socket actions

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::devices::security::HomeMode;
use crate::devices::socket::SocketController;
use crate::error::{PlcError, Result};
use crate::event::{ChangeSource, EventSender, PlcEvent};
use crate::rpc::{RpcClient, RpcRequest};
use crate::stack::{Stack, UnitId};

/// What a rule does when it fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "ctrl", rename_all = "lowercase")]
pub enum ScenarioAction {
    /// Drive a socket of the rule's unit
    Socket { name: String, status: bool },
}

impl ScenarioAction {
    pub fn socket(name: impl Into<String>, status: bool) -> Self {
        ScenarioAction::Socket {
            name: name.into(),
            status,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioRule {
    pub unit: UnitId,
    pub mode: HomeMode,
    pub action: ScenarioAction,
}

impl ScenarioRule {
    pub fn new(unit: UnitId, mode: HomeMode, action: ScenarioAction) -> Self {
        Self { unit, mode, action }
    }
}

/// Ordered rule table applied on home mode transitions.
///
/// Holds no device state; every action goes through the socket controller
/// (local unit) or the RPC client (other units).
pub struct ScenarioEngine {
    rules: Vec<ScenarioRule>,
    stack: Arc<Stack>,
    sockets: Arc<SocketController>,
    client: RpcClient,
    event_tx: EventSender,
}

impl ScenarioEngine {
    pub fn new(
        stack: Arc<Stack>,
        sockets: Arc<SocketController>,
        client: RpcClient,
        event_tx: EventSender,
    ) -> Self {
        Self {
            rules: Vec::new(),
            stack,
            sockets,
            client,
            event_tx,
        }
    }

    /// Append a rule. Its unit must be known and, for the local unit, its
    /// socket must exist.
    pub fn add(&mut self, rule: ScenarioRule) -> Result<()> {
        if !self.stack.is_local(rule.unit) && self.stack.resolve_by_id(rule.unit).is_none() {
            return Err(PlcError::config(format!(
                "scenario rule references unknown unit {}",
                rule.unit
            )));
        }
        match &rule.action {
            ScenarioAction::Socket { name, .. } => {
                if self.stack.is_local(rule.unit) && self.sockets.find(name).is_none() {
                    return Err(PlcError::config(format!(
                        "scenario rule references unknown socket \"{}\"",
                        name
                    )));
                }
            }
        }

        debug!("Add Scenario rule: unit {} {} {:?}", rule.unit, rule.mode, rule.action);
        self.rules.push(rule);
        Ok(())
    }

    /// Rules in declaration order.
    pub fn rules(&self) -> &[ScenarioRule] {
        &self.rules
    }

    fn matches(&self, rule: &ScenarioRule, unit: UnitId, mode: HomeMode) -> bool {
        if rule.mode != mode {
            return false;
        }
        rule.unit == unit || (self.stack.is_local(rule.unit) && self.stack.is_local(unit))
    }

    /// Run every rule matching `(unit, mode)` in declaration order.
    ///
    /// A failing rule is logged and the rest still run. Returns true when
    /// all matching rules took effect.
    pub async fn apply(&self, unit: UnitId, mode: HomeMode) -> bool {
        let rules = self.rules.iter().filter(move |r| self.matches(r, unit, mode));
        self.run_all(unit, mode, rules).await
    }

    /// Run every rule of `mode` in declaration order, each one on its own
    /// unit: local rules through the socket controller, the others over RPC.
    ///
    /// This is what a home mode transition of the local unit triggers.
    pub async fn apply_mode(&self, mode: HomeMode) -> bool {
        let rules = self.rules.iter().filter(move |r| r.mode == mode);
        self.run_all(self.stack.local_id(), mode, rules).await
    }

    async fn run_all<'a>(
        &'a self,
        unit: UnitId,
        mode: HomeMode,
        rules: impl Iterator<Item = &'a ScenarioRule>,
    ) -> bool {
        let mut applied = 0;
        let mut failed = 0;

        for rule in rules {
            match self.run(rule).await {
                Ok(()) => applied += 1,
                Err(e) => {
                    warn!("Scenario rule {:?} on unit {} failed: {}", rule.action, rule.unit, e);
                    failed += 1;
                }
            }
        }

        if applied + failed > 0 {
            info!(
                "Scenario {} for unit {}: {} applied, {} failed",
                mode, unit, applied, failed
            );
        }
        let _ = self.event_tx.send(PlcEvent::ScenarioApplied {
            unit,
            mode,
            applied,
            failed,
        });
        failed == 0
    }

    async fn run(&self, rule: &ScenarioRule) -> Result<()> {
        match &rule.action {
            ScenarioAction::Socket { name, status } => {
                if self.stack.is_local(rule.unit) {
                    self.sockets
                        .set_status_from(name, *status, true, ChangeSource::Scenario)
                        .await
                        .map(|_| ())
                } else {
                    let target = self
                        .stack
                        .resolve_by_id(rule.unit)
                        .ok_or(PlcError::UnknownUnitId { id: rule.unit })?;
                    let request = RpcRequest::SocketStatusSet {
                        name: name.clone(),
                        status: *status,
                    };
                    self.client.call(target, &request).await.map(|_| ())
                }
            }
        }
    }
}
