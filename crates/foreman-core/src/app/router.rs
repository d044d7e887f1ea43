//! TaskRouter - task_type → host / skill の静的テーブル
//!
//! 副作用なしの純粋関数だけで構成します。
//!
//! skill の解決は優先度順に並んだルールを上から評価し、最初に答えを返したものを採用:
//! 1. タスク個別の `skill_override`
//! 2. payload のヒント（decomposition の stage / next_action）
//! 3. task_type のデフォルト

use std::collections::HashMap;

use serde::Serialize;

use crate::config::RouteConfig;
use crate::domain::{DecompositionStage, HostId, RoutingHint, TaskPayload, TaskType};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub location: HostId,
    pub skill: Option<String>,
}

/// Which rule produced a skill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkillRule {
    ExplicitOverride,
    PayloadHint,
    TaskTypeDefault,
}

/// Evaluation order, highest precedence first.
pub const SKILL_RULES: [SkillRule; 3] = [
    SkillRule::ExplicitOverride,
    SkillRule::PayloadHint,
    SkillRule::TaskTypeDefault,
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedSkill {
    pub skill: String,
    pub rule: SkillRule,
}

#[derive(Debug, Clone)]
pub struct TaskRouter {
    routes: HashMap<TaskType, Route>,
    decomposition_skills: HashMap<DecompositionStage, String>,
    next_action_skills: HashMap<String, String>,
}

const DEFAULT_ROUTES: &[(&str, &str, &str)] = &[
    ("dev", "us", "/dev"),
    ("review", "us", "/review"),
    ("qa", "us", "/qa"),
    ("audit", "us", "/audit"),
    ("research", "us", "/research"),
    ("exploratory", "us", "/explore"),
    ("talk", "hk", "/talk"),
    ("data", "hk", "/data"),
];

impl TaskRouter {
    pub fn new(routes: impl IntoIterator<Item = (TaskType, Route)>) -> Self {
        let decomposition_skills = HashMap::from([
            (DecompositionStage::Initial, "/decompose".to_string()),
            (DecompositionStage::Continue, "/decompose-continue".to_string()),
        ]);
        let next_action_skills = HashMap::from([
            ("decompose".to_string(), "/decompose".to_string()),
            ("review".to_string(), "/review".to_string()),
            ("verify".to_string(), "/qa".to_string()),
        ]);
        Self {
            routes: routes.into_iter().collect(),
            decomposition_skills,
            next_action_skills,
        }
    }

    /// Configured routes, or the built-in table when none are given.
    pub fn from_config(routes: &[RouteConfig]) -> Self {
        if routes.is_empty() {
            return Self::default();
        }
        Self::new(routes.iter().map(|r| {
            (
                TaskType::new(&r.task_type),
                Route {
                    location: r.location.clone(),
                    skill: r.skill.clone(),
                },
            )
        }))
    }

    pub fn is_valid(&self, task_type: &str) -> bool {
        self.routes.contains_key(&TaskType::new(task_type))
    }

    /// Host for a task type. `None` for unknown types; callers check `is_valid` first.
    pub fn location_for(&self, task_type: &str) -> Option<HostId> {
        self.routes
            .get(&TaskType::new(task_type))
            .map(|r| r.location.clone())
    }

    /// All hosts any route points at.
    pub fn hosts(&self) -> Vec<HostId> {
        let mut hosts: Vec<HostId> = self.routes.values().map(|r| r.location.clone()).collect();
        hosts.sort();
        hosts.dedup();
        hosts
    }

    /// Every routed task type, sorted.
    pub fn task_types(&self) -> Vec<TaskType> {
        let mut types: Vec<TaskType> = self.routes.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn resolve_skill(&self, task_type: &TaskType, payload: &TaskPayload) -> Option<ResolvedSkill> {
        SKILL_RULES.iter().find_map(|&rule| {
            self.apply(rule, task_type, payload)
                .map(|skill| ResolvedSkill { skill, rule })
        })
    }

    fn apply(&self, rule: SkillRule, task_type: &TaskType, payload: &TaskPayload) -> Option<String> {
        match rule {
            SkillRule::ExplicitOverride => payload
                .skill_override
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            SkillRule::PayloadHint => match payload.routing.as_ref()? {
                RoutingHint::Decomposition { stage } => self.decomposition_skills.get(stage).cloned(),
                RoutingHint::NextAction { action } => {
                    self.next_action_skills.get(&action.to_lowercase()).cloned()
                }
            },
            SkillRule::TaskTypeDefault => self.routes.get(task_type)?.skill.clone(),
        }
    }
}

impl Default for TaskRouter {
    fn default() -> Self {
        Self::new(DEFAULT_ROUTES.iter().map(|&(task_type, host, skill)| {
            (
                TaskType::new(task_type),
                Route {
                    location: HostId::new(host),
                    skill: Some(skill.to_string()),
                },
            )
        }))
    }
}
