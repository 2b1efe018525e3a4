use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};

use crate::agent::{subscribe_agent_topics, AgentHandle, AgentInit, AgentWorker};
use crate::error::TeamsError;
use crate::TeamDeps;

type AgentKey = (String, String);

/// Dynamic supervisor for agent workers: transient restart. A worker that
/// panics is rebuilt from its init args with a fresh mailbox (stale handles
/// error out and callers re-resolve through the registry, as with a
/// registered process name); a worker that stops normally is not restarted.
#[derive(Clone)]
pub struct AgentSupervisor {
    deps: TeamDeps,
    agents: Arc<RwLock<HashMap<AgentKey, AgentHandle>>>,
}

impl AgentSupervisor {
    pub fn new(deps: TeamDeps) -> Self {
        Self {
            deps,
            agents: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn spawn(&self, init: AgentInit) -> Result<AgentHandle, TeamsError> {
        let key = (init.team_id.clone(), init.name.clone());
        let mut agents = self.agents.write().await;
        if agents.contains_key(&key) {
            return Err(TeamsError::DuplicateAgent {
                team_id: init.team_id,
                name: init.name,
            });
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = AgentHandle::from_parts(init.team_id.clone(), init.name.clone(), tx);
        agents.insert(key.clone(), handle.clone());
        drop(agents);
        self.monitor(init, key, rx);
        Ok(handle)
    }

    fn monitor(
        &self,
        init: AgentInit,
        key: AgentKey,
        first_rx: mpsc::UnboundedReceiver<crate::agent::AgentCommand>,
    ) {
        let deps = self.deps.clone();
        let agents = self.agents.clone();
        tokio::spawn(async move {
            let mut cmd_rx = Some(first_rx);
            loop {
                let rx = match cmd_rx.take() {
                    Some(rx) => rx,
                    None => {
                        // restart path: new mailbox, registry handle replaced
                        let (tx, rx) = mpsc::unbounded_channel();
                        let mut map = agents.write().await;
                        match map.get_mut(&key) {
                            Some(slot) => {
                                *slot = AgentHandle::from_parts(
                                    key.0.clone(),
                                    key.1.clone(),
                                    tx,
                                );
                            }
                            // stopped while the worker was down
                            None => break,
                        }
                        rx
                    }
                };
                let bus_rx = subscribe_agent_topics(&deps, &key.0, &key.1);
                let worker = AgentWorker::new(init.clone(), deps.clone());
                match tokio::spawn(worker.run(rx, bus_rx)).await {
                    Ok(()) => {
                        // normal shutdown
                        agents.write().await.remove(&key);
                        break;
                    }
                    Err(err) if err.is_panic() => {
                        if !agents.read().await.contains_key(&key) {
                            break;
                        }
                        tracing::error!(
                            team = %key.0,
                            agent = %key.1,
                            "agent worker panicked; restarting"
                        );
                        continue;
                    }
                    Err(_) => break,
                }
            }
        });
    }

    pub async fn find(&self, team_id: &str, name: &str) -> Option<AgentHandle> {
        self.agents
            .read()
            .await
            .get(&(team_id.to_string(), name.to_string()))
            .cloned()
    }

    pub async fn list(&self, team_id: &str) -> Vec<AgentHandle> {
        let mut handles = self
            .agents
            .read()
            .await
            .iter()
            .filter(|((team, _), _)| team == team_id)
            .map(|(_, handle)| handle.clone())
            .collect::<Vec<_>>();
        handles.sort_by(|a, b| a.name.cmp(&b.name));
        handles
    }

    pub async fn stop(&self, team_id: &str, name: &str) -> Result<(), TeamsError> {
        let handle = self
            .agents
            .write()
            .await
            .remove(&(team_id.to_string(), name.to_string()))
            .ok_or_else(|| TeamsError::AgentNotFound {
                team_id: team_id.to_string(),
                name: name.to_string(),
            })?;
        handle.stop().await;
        Ok(())
    }

    pub async fn stop_team(&self, team_id: &str) {
        let handles = {
            let mut agents = self.agents.write().await;
            let keys = agents
                .keys()
                .filter(|(team, _)| team == team_id)
                .cloned()
                .collect::<Vec<_>>();
            keys.into_iter()
                .filter_map(|key| agents.remove(&key))
                .collect::<Vec<_>>()
        };
        for handle in handles {
            handle.stop().await;
        }
    }
}
