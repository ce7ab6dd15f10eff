//! Reasoning-chain sub-server.
//!
//! Each chain is a state machine: created `in_progress`, steps appended in
//! strict order, then one terminal transition to `completed` or `failed`.
//! The graph is the source of truth; a live in-memory cache is written
//! through on every mutation and hydrated on cold lookups. Concluded chains
//! are exported to the notebook vault as markdown.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{arg_bool_or, arg_opt_f64, arg_opt_str, arg_opt_str_list, arg_str, arg_u64_or};
use crate::error::{GraphError, HubError, HubResult, McpError};
use crate::graph::{Direction, EntityOps, RelationshipOps};
use crate::mcp::{SubServer, ToolDef, ToolRegistry};
use crate::vault::{Frontmatter, NotebookVault};

const CHAIN_LABEL: &str = "ReasoningChain";
const STEP_LABEL: &str = "ReasoningStep";
const HAS_STEP: &str = "HAS_STEP";
const BRANCHED_TO: &str = "BRANCHED_TO";

/// How long a terminal chain stays in the live cache.
const TERMINAL_GRACE: Duration = Duration::from_secs(600);

/// Lifecycle state of a chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainStatus {
    /// Chain accepts new steps.
    #[default]
    InProgress,
    /// Concluded successfully. Terminal.
    Completed,
    /// Concluded unsuccessfully. Terminal.
    Failed,
}

impl ChainStatus {
    /// Whether the chain can still change.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChainStatus::Completed | ChainStatus::Failed)
    }
}

impl std::fmt::Display for ChainStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChainStatus::InProgress => write!(f, "in_progress"),
            ChainStatus::Completed => write!(f, "completed"),
            ChainStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for ChainStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "in_progress" => Ok(ChainStatus::InProgress),
            "completed" => Ok(ChainStatus::Completed),
            "failed" => Ok(ChainStatus::Failed),
            other => Err(format!("unknown chain status: {}", other)),
        }
    }
}

/// Kind of reasoning a step performs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepType {
    Observation,
    #[default]
    Analysis,
    Inference,
    Conclusion,
    Question,
    Hypothesis,
}

impl std::fmt::Display for StepType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StepType::Observation => "observation",
            StepType::Analysis => "analysis",
            StepType::Inference => "inference",
            StepType::Conclusion => "conclusion",
            StepType::Question => "question",
            StepType::Hypothesis => "hypothesis",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for StepType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "observation" => Ok(StepType::Observation),
            "analysis" => Ok(StepType::Analysis),
            "inference" => Ok(StepType::Inference),
            "conclusion" => Ok(StepType::Conclusion),
            "question" => Ok(StepType::Question),
            "hypothesis" => Ok(StepType::Hypothesis),
            other => Err(format!("unknown step type: {}", other)),
        }
    }
}

/// One immutable reasoning step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningStep {
    /// 1-based position within the chain; contiguous, never reused.
    pub step_number: u32,
    pub thought: String,
    pub step_type: StepType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    pub created_at: String,
}

/// An identified sequence of reasoning steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningChain {
    pub id: String,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goal: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub status: ChainStatus,
    #[serde(default)]
    pub steps: Vec<ReasoningStep>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conclusion: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_from: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
}

impl ReasoningChain {
    /// Create a fresh in-progress chain.
    pub fn new(
        prompt: &str,
        context: Option<String>,
        goal: Option<String>,
        tags: Vec<String>,
        branch_from: Option<String>,
    ) -> Self {
        let now = crate::governance::now_timestamp();
        Self {
            id: Uuid::new_v4().to_string(),
            prompt: prompt.to_string(),
            context,
            goal,
            tags,
            status: ChainStatus::InProgress,
            steps: Vec::new(),
            conclusion: None,
            confidence: None,
            branch_from,
            created_at: now.clone(),
            updated_at: now,
            completed_at: None,
        }
    }

    /// Append a step; rejected once the chain is terminal.
    pub fn append_step(
        &mut self,
        thought: &str,
        step_type: StepType,
        confidence: Option<f64>,
        data: Option<Value>,
    ) -> Result<ReasoningStep, McpError> {
        if self.status.is_terminal() {
            return Err(McpError::InvalidRequest {
                message: format!("chain {} is {} and accepts no more steps", self.id, self.status),
            });
        }
        let step = ReasoningStep {
            step_number: self.steps.len() as u32 + 1,
            thought: thought.to_string(),
            step_type,
            confidence,
            data,
            created_at: crate::governance::now_timestamp(),
        };
        self.steps.push(step.clone());
        self.updated_at = step.created_at.clone();
        Ok(step)
    }

    /// Terminal transition. Repeating an identical conclude is a no-op;
    /// a conflicting one is rejected.
    pub fn conclude(
        &mut self,
        conclusion: &str,
        success: bool,
        confidence: Option<f64>,
    ) -> Result<bool, McpError> {
        let target = if success {
            ChainStatus::Completed
        } else {
            ChainStatus::Failed
        };

        if self.status.is_terminal() {
            if self.status == target && self.conclusion.as_deref() == Some(conclusion) {
                return Ok(false);
            }
            return Err(McpError::InvalidRequest {
                message: format!(
                    "chain {} already concluded as {} with a different conclusion",
                    self.id, self.status
                ),
            });
        }

        let now = crate::governance::now_timestamp();
        self.status = target;
        self.conclusion = Some(conclusion.to_string());
        self.confidence = confidence.or(self.confidence);
        self.completed_at = Some(now.clone());
        self.updated_at = now;
        Ok(true)
    }

    /// Copy steps `1..=at_step` (or all) into a new in-progress chain tagged
    /// `branch`. The original is untouched.
    pub fn branch(&self, at_step: Option<u32>) -> ReasoningChain {
        let cut = at_step
            .map(|n| n as usize)
            .unwrap_or(self.steps.len())
            .min(self.steps.len());

        let mut tags = self.tags.clone();
        if !tags.iter().any(|t| t == "branch") {
            tags.push("branch".to_string());
        }

        let mut child = ReasoningChain::new(
            &self.prompt,
            self.context.clone(),
            self.goal.clone(),
            tags,
            Some(self.id.clone()),
        );
        for step in &self.steps[..cut] {
            child.steps.push(ReasoningStep {
                step_number: child.steps.len() as u32 + 1,
                thought: step.thought.clone(),
                step_type: step.step_type,
                confidence: step.confidence,
                data: step.data.clone(),
                created_at: child.created_at.clone(),
            });
        }
        child
    }

    /// Summary view without steps, for listings.
    pub fn summary(&self) -> Value {
        json!({
            "id": self.id,
            "prompt": self.prompt,
            "goal": self.goal,
            "status": self.status,
            "stepCount": self.steps.len(),
            "tags": self.tags,
            "branchFrom": self.branch_from,
            "createdAt": self.created_at,
            "completedAt": self.completed_at,
        })
    }
}

struct CacheEntry {
    chain: ReasoningChain,
    terminal_at: Option<Instant>,
}

/// Chain lifecycle operations with dual persistence.
pub struct ChainService {
    entities: EntityOps,
    relationships: RelationshipOps,
    vault: NotebookVault,
    live: RwLock<HashMap<String, Arc<Mutex<CacheEntry>>>>,
}

impl ChainService {
    /// Build the service over graph ops and the vault.
    pub fn new(entities: EntityOps, relationships: RelationshipOps, vault: NotebookVault) -> Self {
        Self {
            entities,
            relationships,
            vault,
            live: RwLock::new(HashMap::new()),
        }
    }

    /// Create a chain; persists the entity and, for branches, the
    /// `BRANCHED_TO` edge parent→child.
    pub async fn start_thinking(
        &self,
        prompt: &str,
        context: Option<String>,
        goal: Option<String>,
        tags: Vec<String>,
        branch_from: Option<String>,
    ) -> HubResult<ReasoningChain> {
        if let Some(parent) = &branch_from {
            if self.entities.get(CHAIN_LABEL, parent).await?.is_none() {
                return Err(GraphError::NodeNotFound {
                    label: CHAIN_LABEL.to_string(),
                    id: parent.clone(),
                }
                .into());
            }
        }

        let chain = ReasoningChain::new(prompt, context, goal, tags, branch_from.clone());
        self.persist_chain(&chain).await?;

        if let Some(parent) = &branch_from {
            self.relationships
                .create(
                    (CHAIN_LABEL, parent),
                    BRANCHED_TO,
                    (CHAIN_LABEL, &chain.id),
                    None,
                )
                .await?;
        }

        self.cache_insert(chain.clone()).await;
        info!(chain_id = %chain.id, branched = branch_from.is_some(), "Chain started");
        Ok(chain)
    }

    /// Append a step; serialized per chain by the cache entry lock.
    pub async fn add_step(
        &self,
        chain_id: &str,
        thought: &str,
        step_type: StepType,
        confidence: Option<f64>,
        data: Option<Value>,
    ) -> HubResult<ReasoningStep> {
        let entry = self.entry_for(chain_id).await?;
        let mut guard = entry.lock().await;

        let step = guard
            .chain
            .append_step(thought, step_type, confidence, data)?;
        self.persist_step(chain_id, &step).await?;
        self.update_chain_entity(&guard.chain).await?;

        debug!(chain_id = %chain_id, step = step.step_number, "Step added");
        Ok(step)
    }

    /// Terminal transition plus opportunistic vault export.
    ///
    /// The terminal state persists before the export runs; an export failure
    /// never blocks the response and can be retried via `export_chain`.
    pub async fn conclude(
        &self,
        chain_id: &str,
        conclusion: &str,
        success: bool,
        confidence: Option<f64>,
    ) -> HubResult<(ReasoningChain, Option<String>)> {
        let entry = self.entry_for(chain_id).await?;
        let mut guard = entry.lock().await;

        let changed = guard.chain.conclude(conclusion, success, confidence)?;
        if changed {
            self.update_chain_entity(&guard.chain).await?;
            guard.terminal_at = Some(Instant::now());
        }

        let exported = match self.export(&guard.chain).await {
            Ok(name) => Some(name),
            Err(e) => {
                warn!(chain_id = %chain_id, error = %e, "Chain export failed, chain remains terminal");
                None
            }
        };

        info!(chain_id = %chain_id, status = %guard.chain.status, "Chain concluded");
        Ok((guard.chain.clone(), exported))
    }

    /// Fetch a chain, hydrating from the graph on cold lookups.
    pub async fn get_chain(&self, chain_id: &str, include_steps: bool) -> HubResult<ReasoningChain> {
        let entry = self.entry_for(chain_id).await?;
        let guard = entry.lock().await;
        let mut chain = guard.chain.clone();
        if !include_steps {
            chain.steps.clear();
        }
        Ok(chain)
    }

    /// List chain summaries, optionally filtered by status.
    pub async fn list_chains(
        &self,
        status: Option<ChainStatus>,
        limit: usize,
    ) -> HubResult<Vec<Value>> {
        let mut match_props = Map::new();
        if let Some(status) = status {
            match_props.insert("status".to_string(), json!(status.to_string()));
        }
        let rows = self.entities.find(CHAIN_LABEL, &match_props, limit).await?;
        Ok(rows
            .into_iter()
            .map(|props| {
                json!({
                    "id": props.get("id"),
                    "prompt": props.get("prompt"),
                    "goal": props.get("goal"),
                    "status": props.get("status"),
                    "stepCount": props.get("step_count"),
                    "branchFrom": props.get("branch_from"),
                    "createdAt": props.get("created_at"),
                    "completedAt": props.get("completed_at"),
                })
            })
            .collect())
    }

    /// Branch a chain into a new in-progress chain; works on terminal
    /// parents too.
    pub async fn branch_chain(
        &self,
        chain_id: &str,
        at_step: Option<u32>,
    ) -> HubResult<ReasoningChain> {
        let entry = self.entry_for(chain_id).await?;
        let child = {
            let guard = entry.lock().await;
            guard.chain.branch(at_step)
        };

        self.persist_chain(&child).await?;
        for step in &child.steps {
            self.persist_step(&child.id, step).await?;
        }
        self.relationships
            .create(
                (CHAIN_LABEL, chain_id),
                BRANCHED_TO,
                (CHAIN_LABEL, &child.id),
                None,
            )
            .await?;

        self.cache_insert(child.clone()).await;
        info!(parent = %chain_id, child = %child.id, steps = child.steps.len(), "Chain branched");
        Ok(child)
    }

    /// Export (or re-export) a chain to the vault; returns the note name.
    pub async fn export_chain(&self, chain_id: &str) -> HubResult<String> {
        let entry = self.entry_for(chain_id).await?;
        let guard = entry.lock().await;
        Ok(self.export(&guard.chain).await?)
    }

    async fn export(&self, chain: &ReasoningChain) -> Result<String, crate::error::VaultError> {
        let name = format!(
            "reasoning-{}-{}",
            Utc::now().format("%Y-%m-%d"),
            &chain.id[..8.min(chain.id.len())]
        );

        let mut fm = Frontmatter::new()
            .with("title", json!(export_title(&chain.prompt)))
            .with("chain_id", json!(chain.id))
            .with("status", json!(chain.status.to_string()))
            .with("created", json!(chain.created_at));
        if let Some(goal) = &chain.goal {
            fm.set("goal", json!(goal));
        }
        if !chain.tags.is_empty() {
            fm.set("tags", json!(chain.tags));
        }

        let mut body = String::new();
        body.push_str("## Prompt\n\n");
        body.push_str(&chain.prompt);
        body.push_str("\n\n## Reasoning Steps\n");
        for step in &chain.steps {
            body.push_str(&format!(
                "\n### Step {}: {}\n\n{}\n",
                step.step_number, step.step_type, step.thought
            ));
            if let Some(confidence) = step.confidence {
                body.push_str(&format!("\n*Confidence: {}*\n", confidence));
            }
            if let Some(data) = &step.data {
                body.push_str(&format!(
                    "\n```json\n{}\n```\n",
                    serde_json::to_string_pretty(data).unwrap_or_else(|_| "null".to_string())
                ));
            }
        }
        body.push_str("\n## Conclusion\n\n");
        body.push_str(chain.conclusion.as_deref().unwrap_or("(not concluded)"));
        body.push('\n');

        self.vault.write(&name, &body, Some(&fm)).await?;
        Ok(format!("{}.md", name))
    }

    async fn entry_for(&self, chain_id: &str) -> HubResult<Arc<Mutex<CacheEntry>>> {
        self.sweep().await;
        {
            let live = self.live.read().await;
            if let Some(entry) = live.get(chain_id) {
                return Ok(entry.clone());
            }
        }

        let chain = self.hydrate(chain_id).await?;
        let mut live = self.live.write().await;
        // a racing hydration may have inserted the entry already
        let entry = live
            .entry(chain_id.to_string())
            .or_insert_with(|| {
                let terminal_at = chain.status.is_terminal().then(Instant::now);
                Arc::new(Mutex::new(CacheEntry { chain, terminal_at }))
            })
            .clone();
        Ok(entry)
    }

    async fn hydrate(&self, chain_id: &str) -> HubResult<ReasoningChain> {
        let props = self
            .entities
            .get(CHAIN_LABEL, chain_id)
            .await?
            .ok_or_else(|| GraphError::NodeNotFound {
                label: CHAIN_LABEL.to_string(),
                id: chain_id.to_string(),
            })?;

        let mut chain = chain_from_props(&props)?;

        let views = self
            .relationships
            .get_for(CHAIN_LABEL, chain_id, Direction::Out, Some(HAS_STEP))
            .await?;
        let mut steps: Vec<ReasoningStep> = views
            .into_iter()
            .filter_map(|v| step_from_props(&v.other))
            .collect();
        steps.sort_by_key(|s| s.step_number);
        chain.steps = steps;

        debug!(chain_id = %chain_id, steps = chain.steps.len(), "Chain hydrated from graph");
        Ok(chain)
    }

    async fn cache_insert(&self, chain: ReasoningChain) {
        let mut live = self.live.write().await;
        let terminal_at = chain.status.is_terminal().then(Instant::now);
        live.insert(
            chain.id.clone(),
            Arc::new(Mutex::new(CacheEntry { chain, terminal_at })),
        );
    }

    /// Evict terminal chains past the grace period.
    async fn sweep(&self) {
        let mut live = self.live.write().await;
        let mut evict = Vec::new();
        for (id, entry) in live.iter() {
            if let Ok(guard) = entry.try_lock() {
                if let Some(at) = guard.terminal_at {
                    if at.elapsed() > TERMINAL_GRACE {
                        evict.push(id.clone());
                    }
                }
            }
        }
        for id in evict {
            live.remove(&id);
        }
    }

    async fn persist_chain(&self, chain: &ReasoningChain) -> HubResult<()> {
        self.entities
            .create(CHAIN_LABEL, chain_to_props(chain))
            .await?;
        Ok(())
    }

    async fn persist_step(&self, chain_id: &str, step: &ReasoningStep) -> HubResult<()> {
        let step_id = format!("{}-step-{}", chain_id, step.step_number);
        let mut props = Map::new();
        props.insert("id".to_string(), json!(step_id));
        props.insert("thought".to_string(), json!(step.thought));
        props.insert("step_number".to_string(), json!(step.step_number));
        props.insert("step_type".to_string(), json!(step.step_type.to_string()));
        if let Some(confidence) = step.confidence {
            props.insert("confidence".to_string(), json!(confidence));
        }
        if let Some(data) = &step.data {
            // payload kept as a JSON string; step properties stay flat
            props.insert(
                "data".to_string(),
                json!(serde_json::to_string(data).unwrap_or_default()),
            );
        }

        self.entities.create(STEP_LABEL, props).await?;
        let mut rel_props = Map::new();
        rel_props.insert("order".to_string(), json!(step.step_number));
        self.relationships
            .create(
                (CHAIN_LABEL, chain_id),
                HAS_STEP,
                (STEP_LABEL, &step_id),
                Some(rel_props),
            )
            .await?;
        Ok(())
    }

    async fn update_chain_entity(&self, chain: &ReasoningChain) -> HubResult<()> {
        let mut props = chain_to_props(chain);
        props.remove("id");
        self.entities.update(CHAIN_LABEL, &chain.id, props).await?;
        Ok(())
    }
}

fn export_title(prompt: &str) -> String {
    let mut title: String = prompt.chars().take(60).collect();
    if prompt.chars().count() > 60 {
        title.push_str("...");
    }
    format!("Reasoning: {}", title)
}

fn chain_to_props(chain: &ReasoningChain) -> Map<String, Value> {
    let mut props = Map::new();
    props.insert("id".to_string(), json!(chain.id));
    props.insert("prompt".to_string(), json!(chain.prompt));
    props.insert("status".to_string(), json!(chain.status.to_string()));
    props.insert("step_count".to_string(), json!(chain.steps.len()));
    props.insert("tags".to_string(), json!(chain.tags));
    props.insert("created_at".to_string(), json!(chain.created_at));
    props.insert("updated_at".to_string(), json!(chain.updated_at));
    if let Some(context) = &chain.context {
        props.insert("context".to_string(), json!(context));
    }
    if let Some(goal) = &chain.goal {
        props.insert("goal".to_string(), json!(goal));
    }
    if let Some(conclusion) = &chain.conclusion {
        props.insert("conclusion".to_string(), json!(conclusion));
    }
    if let Some(confidence) = chain.confidence {
        props.insert("confidence".to_string(), json!(confidence));
    }
    if let Some(branch_from) = &chain.branch_from {
        props.insert("branch_from".to_string(), json!(branch_from));
    }
    if let Some(completed_at) = &chain.completed_at {
        props.insert("completed_at".to_string(), json!(completed_at));
    }
    props
}

fn chain_from_props(props: &Map<String, Value>) -> Result<ReasoningChain, HubError> {
    let get_str = |key: &str| props.get(key).and_then(Value::as_str).map(str::to_string);
    let id = get_str("id").ok_or_else(|| HubError::Internal {
        message: "chain node missing id".to_string(),
    })?;
    let status = get_str("status")
        .unwrap_or_else(|| "in_progress".to_string())
        .parse::<ChainStatus>()
        .map_err(|e| HubError::Internal { message: e })?;

    Ok(ReasoningChain {
        id,
        prompt: get_str("prompt").unwrap_or_default(),
        context: get_str("context"),
        goal: get_str("goal"),
        tags: props
            .get("tags")
            .and_then(Value::as_array)
            .map(|tags| {
                tags.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
        status,
        steps: Vec::new(),
        conclusion: get_str("conclusion"),
        confidence: props.get("confidence").and_then(Value::as_f64),
        branch_from: get_str("branch_from"),
        created_at: get_str("created_at").unwrap_or_default(),
        updated_at: get_str("updated_at").unwrap_or_default(),
        completed_at: get_str("completed_at"),
    })
}

fn step_from_props(props: &Map<String, Value>) -> Option<ReasoningStep> {
    Some(ReasoningStep {
        step_number: props.get("step_number").and_then(Value::as_u64)? as u32,
        thought: props.get("thought").and_then(Value::as_str)?.to_string(),
        step_type: props
            .get("step_type")
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
            .unwrap_or_default(),
        confidence: props.get("confidence").and_then(Value::as_f64),
        data: props
            .get("data")
            .and_then(Value::as_str)
            .and_then(|s| serde_json::from_str(s).ok()),
        created_at: props
            .get("created_at")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    })
}

/// MCP surface over the chain service.
pub struct ChainServer {
    service: Arc<ChainService>,
    registry: ToolRegistry,
}

impl ChainServer {
    /// Build the sub-server and its tool registry.
    pub fn new(service: Arc<ChainService>) -> Self {
        Self {
            service,
            registry: build_registry(),
        }
    }
}

#[async_trait]
impl SubServer for ChainServer {
    fn name(&self) -> &'static str {
        "reasoning-chains"
    }

    fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    async fn handle(&self, tool: &str, args: Value) -> HubResult<Value> {
        match tool {
            "start_thinking" => {
                let prompt = arg_str(&args, "start_thinking", "prompt")?;
                let chain = self
                    .service
                    .start_thinking(
                        &prompt,
                        arg_opt_str(&args, "context"),
                        arg_opt_str(&args, "goal"),
                        arg_opt_str_list(&args, "start_thinking", "tags")?.unwrap_or_default(),
                        arg_opt_str(&args, "branchFrom"),
                    )
                    .await?;
                Ok(json!({"success": true, "chainId": chain.id, "status": chain.status}))
            }
            "add_step" => {
                let chain_id = arg_str(&args, "add_step", "chainId")?;
                let thought = arg_str(&args, "add_step", "thought")?;
                let step_type = match arg_opt_str(&args, "stepType") {
                    Some(text) => text.parse().map_err(|e: String| McpError::InvalidParameters {
                        tool_name: "add_step".to_string(),
                        message: e,
                    })?,
                    None => StepType::default(),
                };
                let step = self
                    .service
                    .add_step(
                        &chain_id,
                        &thought,
                        step_type,
                        arg_opt_f64(&args, "confidence"),
                        args.get("data").filter(|d| !d.is_null()).cloned(),
                    )
                    .await?;
                Ok(json!({
                    "success": true,
                    "chainId": chain_id,
                    "stepNumber": step.step_number,
                    "stepType": step.step_type,
                }))
            }
            "conclude" => {
                let chain_id = arg_str(&args, "conclude", "chainId")?;
                let conclusion = arg_str(&args, "conclude", "conclusion")?;
                let success = arg_bool_or(&args, "success", true);
                let (chain, exported) = self
                    .service
                    .conclude(
                        &chain_id,
                        &conclusion,
                        success,
                        arg_opt_f64(&args, "confidence"),
                    )
                    .await?;
                Ok(json!({
                    "success": true,
                    "chainId": chain.id,
                    "status": chain.status,
                    "steps": chain.steps.len(),
                    "exportedTo": exported,
                }))
            }
            "get_chain" => {
                let chain_id = arg_str(&args, "get_chain", "chainId")?;
                let include_steps = arg_bool_or(&args, "includeSteps", true);
                let chain = self.service.get_chain(&chain_id, include_steps).await?;
                Ok(json!({"success": true, "chain": chain}))
            }
            "list_chains" => {
                let status = match arg_opt_str(&args, "status") {
                    Some(text) => {
                        Some(text.parse::<ChainStatus>().map_err(|e| {
                            McpError::InvalidParameters {
                                tool_name: "list_chains".to_string(),
                                message: e,
                            }
                        })?)
                    }
                    None => None,
                };
                let limit = arg_u64_or(&args, "limit", 25) as usize;
                let chains = self.service.list_chains(status, limit).await?;
                Ok(json!({"success": true, "count": chains.len(), "chains": chains}))
            }
            "branch_chain" => {
                let chain_id = arg_str(&args, "branch_chain", "chainId")?;
                let at_step = args.get("atStep").and_then(Value::as_u64).map(|n| n as u32);
                let child = self.service.branch_chain(&chain_id, at_step).await?;
                Ok(json!({
                    "success": true,
                    "chainId": child.id,
                    "branchFrom": child.branch_from,
                    "copiedSteps": child.steps.len(),
                }))
            }
            "export_chain" => {
                let chain_id = arg_str(&args, "export_chain", "chainId")?;
                let exported = self.service.export_chain(&chain_id).await?;
                Ok(json!({"success": true, "chainId": chain_id, "exportedTo": exported}))
            }
            other => Err(McpError::UnknownTool {
                tool_name: other.to_string(),
            }
            .into()),
        }
    }
}

fn build_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    registry.register(ToolDef::new(
        "start_thinking",
        "Start a reasoning chain, optionally branching from an existing one.",
        json!({
            "type": "object",
            "properties": {
                "prompt": { "type": "string" },
                "context": { "type": "string" },
                "goal": { "type": "string" },
                "tags": { "type": "array", "items": { "type": "string" } },
                "branchFrom": { "type": "string", "description": "Parent chain id" }
            },
            "required": ["prompt"],
            "additionalProperties": false
        }),
    ));

    registry.register(ToolDef::new(
        "add_step",
        "Append an ordered step to an in-progress chain.",
        json!({
            "type": "object",
            "properties": {
                "chainId": { "type": "string" },
                "thought": { "type": "string" },
                "stepType": {
                    "type": "string",
                    "enum": ["observation", "analysis", "inference", "conclusion", "question", "hypothesis"]
                },
                "confidence": { "type": "number", "minimum": 0, "maximum": 1 },
                "data": { "type": "object", "description": "Structured payload attached to the step" }
            },
            "required": ["chainId", "thought"],
            "additionalProperties": false
        }),
    ));

    registry.register(ToolDef::new(
        "conclude",
        "Conclude a chain (terminal) and export it to the notebook vault.",
        json!({
            "type": "object",
            "properties": {
                "chainId": { "type": "string" },
                "conclusion": { "type": "string" },
                "success": { "type": "boolean", "description": "false marks the chain failed" },
                "confidence": { "type": "number", "minimum": 0, "maximum": 1 }
            },
            "required": ["chainId", "conclusion"],
            "additionalProperties": false
        }),
    ));

    registry.register(ToolDef::new(
        "get_chain",
        "Fetch a chain with its ordered steps.",
        json!({
            "type": "object",
            "properties": {
                "chainId": { "type": "string" },
                "includeSteps": { "type": "boolean" }
            },
            "required": ["chainId"],
            "additionalProperties": false
        }),
    ));

    registry.register(ToolDef::new(
        "list_chains",
        "List chain summaries, optionally filtered by status.",
        json!({
            "type": "object",
            "properties": {
                "status": { "type": "string", "enum": ["in_progress", "completed", "failed"] },
                "limit": { "type": "integer", "minimum": 1, "maximum": 200 }
            },
            "additionalProperties": false
        }),
    ));

    registry.register(ToolDef::new(
        "branch_chain",
        "Copy a chain's steps up to a point into a new in-progress chain.",
        json!({
            "type": "object",
            "properties": {
                "chainId": { "type": "string" },
                "atStep": { "type": "integer", "minimum": 1 }
            },
            "required": ["chainId"],
            "additionalProperties": false
        }),
    ));

    registry.register(ToolDef::new(
        "export_chain",
        "Re-export a chain to the notebook vault.",
        json!({
            "type": "object",
            "properties": {
                "chainId": { "type": "string" }
            },
            "required": ["chainId"],
            "additionalProperties": false
        }),
    ));

    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> ReasoningChain {
        ReasoningChain::new("Capital of France?", None, None, Vec::new(), None)
    }

    #[test]
    fn test_step_numbers_are_contiguous() {
        let mut chain = chain();
        for i in 1..=5u32 {
            let step = chain
                .append_step(&format!("thought {}", i), StepType::Analysis, None, None)
                .unwrap();
            assert_eq!(step.step_number, i);
        }
        let numbers: Vec<u32> = chain.steps.iter().map(|s| s.step_number).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_terminal_chain_rejects_steps() {
        let mut chain = chain();
        chain.append_step("recall", StepType::Observation, None, None).unwrap();
        chain.conclude("Paris", true, Some(0.95)).unwrap();

        assert_eq!(chain.status, ChainStatus::Completed);
        assert!(chain.completed_at.is_some());
        assert!(chain
            .append_step("too late", StepType::Analysis, None, None)
            .is_err());
    }

    #[test]
    fn test_conclude_is_idempotent_for_same_conclusion() {
        let mut chain = chain();
        assert!(chain.conclude("Paris", true, None).unwrap());
        // identical repeat is a no-op success
        assert!(!chain.conclude("Paris", true, None).unwrap());
        // conflicting conclusion is rejected
        assert!(chain.conclude("Lyon", true, None).is_err());
        // conflicting status is rejected
        assert!(chain.conclude("Paris", false, None).is_err());
    }

    #[test]
    fn test_failed_conclusion() {
        let mut chain = chain();
        chain.conclude("dead end", false, None).unwrap();
        assert_eq!(chain.status, ChainStatus::Failed);
        assert!(chain.status.is_terminal());
    }

    #[test]
    fn test_branch_copies_prefix_and_tags() {
        let mut chain = chain();
        chain.append_step("one", StepType::Observation, None, None).unwrap();
        chain.append_step("two", StepType::Analysis, None, None).unwrap();
        chain.append_step("three", StepType::Inference, None, None).unwrap();

        let child = chain.branch(Some(2));
        assert_eq!(child.steps.len(), 2);
        assert_eq!(child.steps[1].thought, "two");
        assert_eq!(child.status, ChainStatus::InProgress);
        assert_eq!(child.branch_from.as_deref(), Some(chain.id.as_str()));
        assert!(child.tags.contains(&"branch".to_string()));
        // original untouched
        assert_eq!(chain.steps.len(), 3);
    }

    #[test]
    fn test_branch_of_terminal_chain_is_in_progress() {
        let mut chain = chain();
        chain.append_step("one", StepType::Observation, None, None).unwrap();
        chain.conclude("done", true, None).unwrap();

        let child = chain.branch(None);
        assert_eq!(child.status, ChainStatus::InProgress);
        assert_eq!(child.steps.len(), 1);
        assert!(child.conclusion.is_none());
    }

    #[test]
    fn test_branch_beyond_length_clamps() {
        let mut chain = chain();
        chain.append_step("one", StepType::Observation, None, None).unwrap();
        let child = chain.branch(Some(10));
        assert_eq!(child.steps.len(), 1);
    }

    #[test]
    fn test_chain_props_round_trip() {
        let mut chain = chain();
        chain.goal = Some("answer geography".to_string());
        chain.tags = vec!["geo".to_string()];
        chain.append_step("recall", StepType::Observation, Some(0.8), None).unwrap();
        chain.conclude("Paris", true, Some(0.9)).unwrap();

        let props = chain_to_props(&chain);
        let back = chain_from_props(&props).unwrap();
        assert_eq!(back.id, chain.id);
        assert_eq!(back.status, ChainStatus::Completed);
        assert_eq!(back.goal, chain.goal);
        assert_eq!(back.conclusion.as_deref(), Some("Paris"));
        assert_eq!(back.tags, chain.tags);
        assert_eq!(back.completed_at, chain.completed_at);
    }

    #[test]
    fn test_step_props_round_trip() {
        let step = ReasoningStep {
            step_number: 2,
            thought: "Paris is the capital".to_string(),
            step_type: StepType::Inference,
            confidence: Some(0.9),
            data: Some(json!({"source": "memory"})),
            created_at: crate::governance::now_timestamp(),
        };

        let mut props = Map::new();
        props.insert("step_number".to_string(), json!(step.step_number));
        props.insert("thought".to_string(), json!(step.thought));
        props.insert("step_type".to_string(), json!(step.step_type.to_string()));
        props.insert("confidence".to_string(), json!(0.9));
        props.insert(
            "data".to_string(),
            json!(serde_json::to_string(step.data.as_ref().unwrap()).unwrap()),
        );
        props.insert("created_at".to_string(), json!(step.created_at));

        let back = step_from_props(&props).unwrap();
        assert_eq!(back.step_number, 2);
        assert_eq!(back.step_type, StepType::Inference);
        assert_eq!(back.data.unwrap()["source"], "memory");
    }

    #[test]
    fn test_status_and_step_type_parsing() {
        assert_eq!("completed".parse::<ChainStatus>().unwrap(), ChainStatus::Completed);
        assert!("paused".parse::<ChainStatus>().is_err());
        assert_eq!("hypothesis".parse::<StepType>().unwrap(), StepType::Hypothesis);
        assert!("guess".parse::<StepType>().is_err());
    }

    #[test]
    fn test_export_title_truncates() {
        let long = "x".repeat(100);
        let title = export_title(&long);
        assert!(title.ends_with("..."));
        assert!(title.len() < 80);
        assert_eq!(export_title("short"), "Reasoning: short");
    }
}
