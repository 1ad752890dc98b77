// Process routes
//
// A route maps tool names onto an invocation target. Matching walks the
// configured routes in order; the first accepting match wins. Patterns
// that fail to compile (regex/glob) simply never match; the failure is
// logged once at selection time.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

/// How a route pattern is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Exact,
    Prefix,
    Regex,
    Glob,
}

/// Route matcher
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteMatch {
    #[serde(rename = "type")]
    pub match_type: MatchType,
    pub pattern: String,
}

impl RouteMatch {
    /// Whether this matcher accepts the (original) tool name
    pub fn accepts(&self, tool_name: &str) -> bool {
        match self.match_type {
            MatchType::Exact => tool_name == self.pattern,
            MatchType::Prefix => tool_name.starts_with(&self.pattern),
            MatchType::Regex => match regex::Regex::new(&self.pattern) {
                Ok(re) => re.is_match(tool_name),
                Err(e) => {
                    warn!(pattern = %self.pattern, error = %e, "invalid route regex");
                    false
                }
            },
            MatchType::Glob => match glob::Pattern::new(&self.pattern) {
                Ok(pattern) => pattern.matches(tool_name),
                Err(e) => {
                    warn!(pattern = %self.pattern, error = %e, "invalid route glob");
                    false
                }
            },
        }
    }
}

/// Invocation target, a closed set
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum InvokeSpec {
    /// In-process handler from the module registry
    Module {
        #[serde(default = "default_handler_name")]
        handler: String,
    },
    /// POST the tool context as JSON; the response body is the result
    Http {
        url: String,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        headers: HashMap<String, String>,
    },
    /// Spawn a subprocess; context JSON + newline on stdin, JSON result on
    /// stdout, non-zero exit is fatal
    Command {
        command: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<String>,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        env: HashMap<String, String>,
    },
    /// Delegate to the MCP client pool
    Mcp {
        #[serde(skip_serializing_if = "Option::is_none")]
        server: Option<String>,
    },
}

fn default_handler_name() -> String {
    "handle".to_string()
}

/// One configured route
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessRoute {
    pub id: String,
    #[serde(rename = "match")]
    pub route_match: RouteMatch,
    pub invoke: InvokeSpec,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

/// First configured route accepting `tool_name`
pub fn select_route<'a>(routes: &'a [ProcessRoute], tool_name: &str) -> Option<&'a ProcessRoute> {
    routes.iter().find(|r| r.route_match.accepts(tool_name))
}
