//! Pipeline jobs and steps

use crate::model::Permissions;
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;

/// A generated step. Custom steps from the document are kept as raw YAML.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub name: String,
    pub id: Option<String>,
    pub condition: Option<String>,
    pub uses: Option<String>,
    pub with: BTreeMap<String, Value>,
    pub env: BTreeMap<String, String>,
    pub timeout_minutes: Option<u32>,
    pub continue_on_error: bool,
    pub run: Option<String>,
}

impl Step {
    /// A shell step
    pub fn run(name: impl Into<String>, script: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: None,
            condition: None,
            uses: None,
            with: BTreeMap::new(),
            env: BTreeMap::new(),
            timeout_minutes: None,
            continue_on_error: false,
            run: Some(script.into()),
        }
    }

    /// An action step
    pub fn uses(name: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            uses: Some(action.into()),
            run: None,
            ..Self::run(name, "")
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn when(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    pub fn input(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with.insert(key.into(), value.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn timeout(mut self, minutes: u32) -> Self {
        self.timeout_minutes = Some(minutes);
        self
    }

    pub fn allow_failure(mut self) -> Self {
        self.continue_on_error = true;
        self
    }

    pub fn envs(mut self, env: &BTreeMap<String, String>) -> Self {
        self.env.extend(env.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn to_yaml(&self) -> Value {
        let mut step = Mapping::new();
        step.insert("name".into(), self.name.clone().into());
        if let Some(id) = &self.id {
            step.insert("id".into(), id.clone().into());
        }
        if let Some(condition) = &self.condition {
            step.insert("if".into(), condition.clone().into());
        }
        if let Some(uses) = &self.uses {
            step.insert("uses".into(), uses.clone().into());
        }
        if !self.with.is_empty() {
            let with: Mapping = self
                .with
                .iter()
                .map(|(k, v)| (Value::from(k.clone()), v.clone()))
                .collect();
            step.insert("with".into(), Value::Mapping(with));
        }
        if !self.env.is_empty() {
            step.insert("env".into(), string_map(&self.env));
        }
        if let Some(timeout) = self.timeout_minutes {
            step.insert("timeout-minutes".into(), timeout.into());
        }
        if self.continue_on_error {
            step.insert("continue-on-error".into(), true.into());
        }
        if let Some(run) = &self.run {
            step.insert("run".into(), run.clone().into());
        }
        Value::Mapping(step)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub name: String,
    pub needs: Vec<String>,
    pub condition: Option<String>,
    pub runs_on: Value,
    pub permissions: Permissions,
    pub timeout_minutes: Option<u32>,
    pub env: BTreeMap<String, String>,
    pub outputs: BTreeMap<String, String>,
    pub steps: Vec<Value>,
}

impl Job {
    pub fn new(name: impl Into<String>, runs_on: Value) -> Self {
        Self {
            name: name.into(),
            needs: Vec::new(),
            condition: None,
            runs_on,
            permissions: Permissions::new(),
            timeout_minutes: None,
            env: BTreeMap::new(),
            outputs: BTreeMap::new(),
            steps: Vec::new(),
        }
    }

    /// Add a dependency, ignoring repeats
    pub fn needs(&mut self, job: impl Into<String>) -> &mut Self {
        let job = job.into();
        if !self.needs.contains(&job) {
            self.needs.push(job);
        }
        self
    }

    pub fn step(&mut self, step: Step) -> &mut Self {
        self.steps.push(step.to_yaml());
        self
    }

    /// Add steps from the document verbatim
    pub fn raw_steps(&mut self, steps: &[Value]) -> &mut Self {
        self.steps.extend(steps.iter().cloned());
        self
    }

    pub fn output(&mut self, name: impl Into<String>, expression: impl Into<String>) -> &mut Self {
        self.outputs.insert(name.into(), expression.into());
        self
    }

    pub fn env(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Scripts of every `run` step, in order
    pub fn scripts(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().filter_map(|step| step.get("run").and_then(Value::as_str))
    }

    pub fn to_yaml(&self) -> Value {
        let mut job = Mapping::new();
        match self.needs.as_slice() {
            [] => {}
            [single] => {
                job.insert("needs".into(), single.clone().into());
            }
            many => {
                let needs = many.iter().cloned().map(Value::from).collect();
                job.insert("needs".into(), Value::Sequence(needs));
            }
        }
        if let Some(condition) = &self.condition {
            job.insert("if".into(), condition.clone().into());
        }
        job.insert("runs-on".into(), self.runs_on.clone());
        job.insert("permissions".into(), self.permissions.to_yaml());
        if let Some(timeout) = self.timeout_minutes {
            job.insert("timeout-minutes".into(), timeout.into());
        }
        if !self.env.is_empty() {
            job.insert("env".into(), string_map(&self.env));
        }
        if !self.outputs.is_empty() {
            job.insert("outputs".into(), string_map(&self.outputs));
        }
        job.insert("steps".into(), Value::Sequence(self.steps.clone()));
        Value::Mapping(job)
    }
}

fn string_map(map: &BTreeMap<String, String>) -> Value {
    Value::Mapping(
        map.iter()
            .map(|(k, v)| (Value::from(k.clone()), Value::from(v.clone())))
            .collect(),
    )
}
