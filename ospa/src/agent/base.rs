//! Agent base: per-name process-wide singletons carrying prompts, a
//! template-variable contract, and a hot-swappable LLM engine handle.
//!
//! Constructing an agent under a name that already exists returns the
//! existing instance unchanged. The engine handle can be swapped at any
//! time (individually or across all live agents); an in-flight step keeps
//! using the handle it captured at entry.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, LazyLock, Mutex, PoisonError, RwLock};

use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::llm::LlmEngine;
use crate::message::AIContext;

static AGENTS: LazyLock<Mutex<HashMap<String, Arc<Agent>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// A named agent: system prompt, user-prompt template, and LLM engine.
///
/// The user-prompt template uses brace interpolation (`{{ variable }}`);
/// its variables are discovered by static parse at construction and
/// validated at render time.
#[derive(Debug)]
pub struct Agent {
    name: String,
    system_prompt: RwLock<String>,
    user_prompt_template: RwLock<String>,
    template_vars: RwLock<BTreeSet<String>>,
    engine: RwLock<Arc<LlmEngine>>,
}

/// Statically parse the variables a template interpolates.
pub fn template_variables(template: &str) -> Result<BTreeSet<String>> {
    if template.is_empty() {
        return Ok(BTreeSet::new());
    }
    let env = minijinja::Environment::new();
    let tmpl = env
        .template_from_str(template)
        .map_err(|e| Error::config(format!("invalid prompt template: {e}")))?;
    Ok(tmpl.undeclared_variables(false).into_iter().collect())
}

impl Agent {
    /// Return the agent registered under `name`, constructing it on first
    /// use. A construction that hits an existing name returns that
    /// instance unchanged (the supplied prompts and engine are ignored).
    pub fn get_or_create(
        name: impl Into<String>,
        engine: Arc<LlmEngine>,
        system_prompt: impl Into<String>,
        user_prompt_template: impl Into<String>,
    ) -> Result<Arc<Self>> {
        let name = name.into();
        let mut agents = AGENTS.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(agent) = agents.get(&name) {
            return Ok(Arc::clone(agent));
        }

        let user_prompt_template = user_prompt_template.into();
        let template_vars = template_variables(&user_prompt_template)?;
        let agent = Arc::new(Self {
            name: name.clone(),
            system_prompt: RwLock::new(system_prompt.into()),
            user_prompt_template: RwLock::new(user_prompt_template),
            template_vars: RwLock::new(template_vars),
            engine: RwLock::new(engine),
        });
        agents.insert(name, Arc::clone(&agent));
        Ok(agent)
    }

    /// The agent's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The current system prompt.
    #[must_use]
    pub fn system_prompt(&self) -> String {
        self.system_prompt
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The current template variables, discovered by static parse.
    #[must_use]
    pub fn template_vars(&self) -> BTreeSet<String> {
        self.template_vars
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Capture the current engine handle. A step captures once and keeps
    /// using that handle even if the agent is re-pointed mid-call.
    #[must_use]
    pub fn engine(&self) -> Arc<LlmEngine> {
        Arc::clone(
            &self
                .engine
                .read()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }

    /// Swap this agent's engine.
    pub fn set_engine(&self, engine: Arc<LlmEngine>) {
        *self.engine.write().unwrap_or_else(PoisonError::into_inner) = engine;
        tracing::debug!(target: "ospa::agent", agent = %self.name, "engine updated");
    }

    /// Replace the system prompt.
    pub fn update_system_prompt(&self, system_prompt: impl Into<String>) {
        *self
            .system_prompt
            .write()
            .unwrap_or_else(PoisonError::into_inner) = system_prompt.into();
    }

    /// Replace the user-prompt template and re-derive its variables.
    pub fn update_user_template(&self, user_prompt_template: impl Into<String>) -> Result<()> {
        let template = user_prompt_template.into();
        let vars = template_variables(&template)?;
        *self
            .user_prompt_template
            .write()
            .unwrap_or_else(PoisonError::into_inner) = template;
        *self
            .template_vars
            .write()
            .unwrap_or_else(PoisonError::into_inner) = vars;
        Ok(())
    }

    /// Render the user prompt with the supplied variables.
    ///
    /// Every declared template variable must be present (missing ones fail
    /// with [`Error::MissingTemplateVariable`]); extra entries are
    /// ignored.
    pub fn render_user_prompt(&self, vars: &Map<String, Value>) -> Result<String> {
        let declared = self.template_vars();
        let missing: Vec<String> = declared
            .iter()
            .filter(|name| !vars.contains_key(*name))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(Error::missing_template_vars(&self.name, missing));
        }

        let template = self
            .user_prompt_template
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let env = minijinja::Environment::new();
        let tmpl = env
            .template_from_str(&template)
            .map_err(|e| Error::config(format!("invalid prompt template: {e}")))?;
        tmpl.render(minijinja::Value::from_serialize(vars))
            .map_err(|e| Error::config(format!("prompt rendering failed: {e}")))
    }

    /// Build the working context for one step: the external context when
    /// supplied (else a fresh one), the system prompt, then the rendered
    /// user prompt.
    pub fn prepare_context(
        &self,
        context: Option<AIContext>,
        vars: &Map<String, Value>,
    ) -> Result<AIContext> {
        let mut working = context.unwrap_or_default();
        working.add_system_prompt(self.system_prompt());
        working.add_user_prompt(self.render_user_prompt(vars)?);
        Ok(working)
    }

    /// Swap the engine of every live agent at once. Returns how many were
    /// updated.
    pub fn update_all_engines(engine: &Arc<LlmEngine>) -> usize {
        let agents = AGENTS.lock().unwrap_or_else(PoisonError::into_inner);
        for agent in agents.values() {
            agent.set_engine(Arc::clone(engine));
        }
        let count = agents.len();
        tracing::info!(target: "ospa::agent", count, "updated engine for all agents");
        count
    }

    /// Names of all registered agents.
    #[must_use]
    pub fn registered_names() -> Vec<String> {
        let agents = AGENTS.lock().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = agents.keys().cloned().collect();
        names.sort();
        names
    }
}
