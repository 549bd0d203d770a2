//! Grant model and the hierarchical permission evaluator.
//!
//! A grant rule is a `component[:view[:task]]` pattern; `*` wildcards the
//! view or task position and `**` covers a whole component. Effective
//! grants for a principal are three scopes (`user`, `role`, `public`),
//! each an ordered include/exclude pair. Exclude always beats include
//! within a scope, scopes are evaluated most-specific first, and the
//! default is deny.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::auth::store::{GrantRepository, UserId};
use crate::config::{GrantSeeds, WardenConfig};
use crate::core::Result;

/// Account endpoints that must never require authorization, so a broken
/// grant store cannot lock everyone out.
const BASELINE_PUBLIC: [&str; 8] = [
    "errors:**",
    "members:logout",
    "members:login",
    "members:auth",
    "members:endpoint",
    "members:resetpass:*",
    "members:pwreset:*",
    "members:activate:*",
];

/// Ordered include/exclude rule lists for one scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrantList {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl GrantList {
    pub fn new<I, E>(include: I, exclude: E) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
        E: IntoIterator,
        E::Item: Into<String>,
    {
        Self {
            include: include.into_iter().map(Into::into).collect(),
            exclude: exclude.into_iter().map(Into::into).collect(),
        }
    }

    /// Include-only list.
    pub fn include_only<I>(include: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Self {
            include: include.into_iter().map(Into::into).collect(),
            exclude: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }

    /// Append another list's rules, preserving order.
    pub fn union(&mut self, other: GrantList) {
        self.include.extend(other.include);
        self.exclude.extend(other.exclude);
    }

    /// Decode a stored grant document, degrading to empty lists when the
    /// value is not a recognizable include/exclude structure. Absent
    /// rules mean deny; they are never an error.
    pub fn from_json_lenient(raw: &str) -> Self {
        let value: serde_json::Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(err) => {
                warn!("unreadable grant document, treating as empty: {}", err);
                return Self::default();
            }
        };
        let Some(object) = value.as_object() else {
            warn!("grant document is not an object, treating as empty");
            return Self::default();
        };
        let rules_of = |key: &str| -> Vec<String> {
            match object.get(key) {
                Some(serde_json::Value::Array(items)) => items
                    .iter()
                    .filter_map(|item| item.as_str().map(str::to_string))
                    .collect(),
                Some(_) => {
                    warn!("grant document field '{}' is not a list, ignoring", key);
                    Vec::new()
                }
                None => Vec::new(),
            }
        };
        Self {
            include: rules_of("include"),
            exclude: rules_of("exclude"),
        }
    }
}

/// The three evaluation scopes, most specific first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantSet {
    pub user: GrantList,
    pub role: GrantList,
    pub public: GrantList,
}

/// Check one rule against a requested triple. `firewalled_home` is the
/// home component carrying the firewall prefix; a bare `*` grant never
/// reaches it.
fn rule_matches(rule: &str, component: &str, view: &str, task: &str, firewalled_home: &str) -> bool {
    if rule == "*" {
        // A blanket grant must not imply the landing route; home access
        // stays explicitly granted.
        return component != "home" && component != firewalled_home;
    }

    let mut parts = rule.splitn(3, ':');
    let rule_component = parts.next().unwrap_or("");
    if rule_component != component {
        return false;
    }

    match (parts.next(), parts.next()) {
        // `component`: the whole component, tasks included
        (None, None) => true,
        // `component:**`: any view, any task
        (Some("**"), None) => true,
        // `component:*`: any view, only when no task was requested
        (Some("*"), None) => task.is_empty(),
        // `component:`: only the bare component request
        (Some(""), None) => view.is_empty() && task.is_empty(),
        // `component:view`: that view, task-less requests only
        (Some(rule_view), None) => task.is_empty() && rule_view == view,
        // `component:*:*`: any view and task, but a task must be present
        (Some("*"), Some("*")) => !task.is_empty(),
        // `component:*:task`: any view with that exact task
        (Some("*"), Some(rule_task)) => !task.is_empty() && rule_task == task,
        // `component:view:*`: that view with any task
        (Some(rule_view), Some("*")) => rule_view == view,
        // `component:view:task`: exact triple
        (Some(rule_view), Some(rule_task)) => {
            !task.is_empty() && rule_view == view && rule_task == task
        }
        // splitn never yields an item after returning None
        (None, Some(_)) => unreachable!(),
    }
}

/// First matching rule in list order wins; order is significant and
/// preserved from configuration.
pub fn any_rule_matches(
    rules: &[String],
    component: &str,
    view: &str,
    task: &str,
    firewall: &str,
) -> bool {
    // Components kept their historical `com_` prefix in some stores.
    let component = component.strip_prefix("com_").unwrap_or(component);
    let firewalled_home = format!("{}home", firewall);
    rules
        .iter()
        .any(|rule| rule_matches(rule.trim(), component, view, task, &firewalled_home))
}

/// Computes and memoizes effective grants, and decides access for
/// `component/view/task` requests.
///
/// One evaluator serves one request context; the per-user memo never
/// outlives it.
pub struct GrantEvaluator {
    repo: Arc<dyn GrantRepository>,
    seeds: GrantSeeds,
    firewall: String,
    cache: RwLock<HashMap<Option<UserId>, Arc<GrantSet>>>,
}

impl GrantEvaluator {
    pub fn new(repo: Arc<dyn GrantRepository>, config: &WardenConfig) -> Self {
        Self {
            repo,
            seeds: config.grants.clone(),
            firewall: config.firewall.clone(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Effective grants for one principal, memoized for this instance.
    pub fn grants_for(&self, userid: Option<UserId>) -> Result<Arc<GrantSet>> {
        if let Some(hit) = self.cache.read().get(&userid) {
            return Ok(hit.clone());
        }
        let computed = Arc::new(self.compute(userid)?);
        self.cache.write().insert(userid, computed.clone());
        Ok(computed)
    }

    fn compute(&self, userid: Option<UserId>) -> Result<GrantSet> {
        let mut set = GrantSet {
            user: self.seeds.user.clone(),
            role: self.seeds.role.clone(),
            public: self.seeds.public.clone(),
        };

        set.public.union(self.repo.public_grants()?);
        for rule in BASELINE_PUBLIC {
            set.public.include.push(format!("{}{}", self.firewall, rule));
        }

        if let Some(userid) = userid {
            set.user.union(self.repo.user_grants(userid)?);
            let roles = self.repo.role_ids(userid)?;
            if !roles.is_empty() {
                set.role.union(self.repo.role_grants(&roles)?);
            }
            debug!("computed grants for user {}", userid);
        }

        Ok(set)
    }

    /// Decide an access request. Absent grants are a normal deny, and any
    /// store failure also denies rather than failing open.
    pub fn is_allowed(&self, component: &str, view: &str, task: &str, userid: Option<UserId>) -> bool {
        let component = if component.is_empty() { "home" } else { component };
        let component = format!("{}{}", self.firewall, component);

        let grants = match self.grants_for(userid) {
            Ok(grants) => grants,
            Err(err) => {
                warn!("grant lookup failed, denying {}: {}", component, err);
                return false;
            }
        };

        for scope in [&grants.user, &grants.role, &grants.public] {
            if any_rule_matches(&scope.exclude, &component, view, task, &self.firewall) {
                return false;
            }
            if any_rule_matches(&scope.include, &component, view, task, &self.firewall) {
                return true;
            }
        }

        false
    }

    /// Decide a dotted `component.view.task` action string.
    pub fn is_granted(&self, action: &str, userid: Option<UserId>) -> bool {
        let mut parts = action.splitn(3, '.');
        let component = parts.next().unwrap_or("");
        let view = parts.next().unwrap_or("");
        let task = parts.next().unwrap_or("");
        self.is_allowed(component, view, task, userid)
    }
}
