//! Per-route access policies.
//!
//! A policy is a list of tagged rules joined by an AND/OR combinator. Rules
//! are data, not code: the engine walks the variants, consulting claims, the
//! allowlist store, and cached chain reads. Evaluation is fail-closed: an
//! AND errors out on the first faulty rule, while an OR records faults but
//! lets a later success win.
//!
//! The registry holds the active policy set behind an atomic swap so a reload
//! is all-or-nothing: an in-flight request sees the old set or the new set,
//! never a mix.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use alloy_primitives::U256;

use crate::cache::TtlCache;
use crate::chain::{ChainClient, ChainError};
use crate::store::{Store, StoreError};
use crate::types::{Claims, EvmAddress, TokenAmount};

/// One admission rule. The serde tag is part of the policy-document format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Rule {
    /// True iff the scope string is carried verbatim in the claims.
    HasScope { scope: String },
    /// Membership of the claims address, either in an inline address list or
    /// in a named stored allowlist. Case-insensitive by address construction.
    InAllowlist {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        allowlist: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        addresses: Vec<EvmAddress>,
    },
    /// ERC-20 balance of the claims address is at least `minimum` base units.
    Erc20MinBalance {
        chain_id: u64,
        token: EvmAddress,
        minimum: TokenAmount,
    },
    /// The claims address owns the given ERC-721 token.
    Erc721Owner {
        chain_id: u64,
        token: EvmAddress,
        token_id: TokenAmount,
    },
}

impl Rule {
    fn kind(&self) -> &'static str {
        match self {
            Rule::HasScope { .. } => "has_scope",
            Rule::InAllowlist { .. } => "in_allowlist",
            Rule::Erc20MinBalance { .. } => "erc20_min_balance",
            Rule::Erc721Owner { .. } => "erc721_owner",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Logic {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    /// Path pattern: literal segments, `*` for one segment, a trailing `**`
    /// for any remainder.
    pub path: String,
    /// Uppercase HTTP method, or `*`.
    pub method: String,
    pub logic: Logic,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PolicyDocument {
    pub policies: Vec<Policy>,
}

#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("no chain client configured for on-chain rules")]
    NoChainClient,
    #[error("cached value is malformed: {0}")]
    BadCacheEntry(String),
}

#[derive(Debug, thiserror::Error)]
pub enum PolicyLoadError {
    #[error("policy document is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read policy file: {0}")]
    Io(#[from] std::io::Error),
}

/// What the engine needs besides claims: chain reads, the read-through
/// cache, and the allowlist store.
pub struct PolicyContext<'a> {
    pub chain: Option<&'a ChainClient>,
    pub cache: &'a TtlCache,
    pub store: &'a dyn Store,
    pub cache_ttl: Duration,
}

/// Per-rule outcome kept for the audit trail.
#[derive(Debug, Clone, Serialize)]
pub struct RuleOutcome {
    pub rule: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of evaluating one policy against one request.
#[derive(Debug)]
pub struct Evaluation {
    pub allowed: bool,
    /// Set when the decision could not be made cleanly; with `allowed ==
    /// false` this is an availability fault, not a denial.
    pub error: Option<PolicyError>,
    pub trace: Vec<RuleOutcome>,
}

pub async fn evaluate_rule(
    rule: &Rule,
    claims: &Claims,
    ctx: &PolicyContext<'_>,
) -> Result<bool, PolicyError> {
    match rule {
        Rule::HasScope { scope } => Ok(claims.has_scope(scope)),
        Rule::InAllowlist {
            allowlist,
            addresses,
        } => {
            if addresses.contains(&claims.address) {
                return Ok(true);
            }
            match allowlist {
                Some(name) => Ok(ctx.store.allowlist_contains(name, &claims.address).await?),
                None => Ok(false),
            }
        }
        Rule::Erc20MinBalance {
            chain_id,
            token,
            minimum,
        } => {
            let key = format!(
                "erc20_balance:{chain_id}:{}:{}",
                token.canonical(),
                claims.address.canonical()
            );
            // The chain client is only needed on a miss; a cached balance
            // decides without any chain traffic.
            let cached = ctx
                .cache
                .get_or_fetch(&key, ctx.cache_ttl, || async {
                    let chain = ctx.chain.ok_or(PolicyError::NoChainClient)?;
                    let balance = chain
                        .erc20_balance_of(*chain_id, token, &claims.address)
                        .await?;
                    Ok::<_, PolicyError>(Value::String(balance.to_string()))
                })
                .await?;
            let raw = cached
                .as_str()
                .ok_or_else(|| PolicyError::BadCacheEntry(format!("{key} is not a string")))?;
            let balance = U256::from_str_radix(raw, 10)
                .map_err(|e| PolicyError::BadCacheEntry(e.to_string()))?;
            Ok(balance >= minimum.value())
        }
        Rule::Erc721Owner {
            chain_id,
            token,
            token_id,
        } => {
            // Keyed by token, not by user: ownership is a shared fact.
            let key = format!("erc721_owner:{chain_id}:{}:{token_id}", token.canonical());
            let cached = ctx
                .cache
                .get_or_fetch(&key, ctx.cache_ttl, || async {
                    let chain = ctx.chain.ok_or(PolicyError::NoChainClient)?;
                    match chain.erc721_owner_of(*chain_id, token, *token_id).await {
                        Ok(owner) => Ok::<_, PolicyError>(Value::String(owner.canonical())),
                        // A nonexistent token has no owner; cache that fact.
                        Err(ChainError::TokenNotFound) => Ok(Value::Null),
                        Err(other) => Err(other.into()),
                    }
                })
                .await?;
            match cached {
                Value::Null => Ok(false),
                Value::String(owner) => {
                    let owner: EvmAddress = owner
                        .parse()
                        .map_err(|e: String| PolicyError::BadCacheEntry(e))?;
                    Ok(owner == claims.address)
                }
                other => Err(PolicyError::BadCacheEntry(format!(
                    "{key} holds unexpected value {other}"
                ))),
            }
        }
    }
}

/// Walks the rule list under the policy's combinator.
///
/// AND short-circuits on the first false or faulty rule (fail-closed). OR
/// short-circuits on the first clean success; faults are recorded but only
/// surface when no rule succeeds.
pub async fn evaluate_policy(
    policy: &Policy,
    claims: &Claims,
    ctx: &PolicyContext<'_>,
) -> Evaluation {
    let mut trace = Vec::with_capacity(policy.rules.len());
    match policy.logic {
        Logic::And => {
            for rule in &policy.rules {
                match evaluate_rule(rule, claims, ctx).await {
                    Ok(true) => trace.push(RuleOutcome {
                        rule: rule.kind(),
                        passed: Some(true),
                        error: None,
                    }),
                    Ok(false) => {
                        trace.push(RuleOutcome {
                            rule: rule.kind(),
                            passed: Some(false),
                            error: None,
                        });
                        return Evaluation {
                            allowed: false,
                            error: None,
                            trace,
                        };
                    }
                    Err(error) => {
                        trace.push(RuleOutcome {
                            rule: rule.kind(),
                            passed: None,
                            error: Some(error.to_string()),
                        });
                        return Evaluation {
                            allowed: false,
                            error: Some(error),
                            trace,
                        };
                    }
                }
            }
            Evaluation {
                allowed: true,
                error: None,
                trace,
            }
        }
        Logic::Or => {
            let mut first_error = None;
            for rule in &policy.rules {
                match evaluate_rule(rule, claims, ctx).await {
                    Ok(true) => {
                        trace.push(RuleOutcome {
                            rule: rule.kind(),
                            passed: Some(true),
                            error: None,
                        });
                        return Evaluation {
                            allowed: true,
                            error: None,
                            trace,
                        };
                    }
                    Ok(false) => trace.push(RuleOutcome {
                        rule: rule.kind(),
                        passed: Some(false),
                        error: None,
                    }),
                    Err(error) => {
                        trace.push(RuleOutcome {
                            rule: rule.kind(),
                            passed: None,
                            error: Some(error.to_string()),
                        });
                        if first_error.is_none() {
                            first_error = Some(error);
                        }
                    }
                }
            }
            Evaluation {
                allowed: false,
                error: first_error,
                trace,
            }
        }
    }
}

/// Process-wide policy set with atomic reload and route matching.
pub struct PolicyRegistry {
    active: RwLock<Arc<Vec<Policy>>>,
    default_allow: bool,
    error_as_forbidden: bool,
}

impl PolicyRegistry {
    pub fn new(default_allow: bool, error_as_forbidden: bool) -> Self {
        Self {
            active: RwLock::new(Arc::new(Vec::new())),
            default_allow,
            error_as_forbidden,
        }
    }

    /// Admission default for routes with no matching policy.
    pub fn default_allow(&self) -> bool {
        self.default_allow
    }

    /// Report evaluation faults as 403 instead of 500.
    pub fn error_as_forbidden(&self) -> bool {
        self.error_as_forbidden
    }

    /// Replaces the active set in one swap, pre-sorted most-specific-first.
    pub fn replace(&self, mut policies: Vec<Policy>) {
        policies.sort_by_key(|policy| std::cmp::Reverse(specificity(&policy.path)));
        let mut active = self.active.write().expect("policy registry lock poisoned");
        *active = Arc::new(policies);
    }

    /// Parses `{"policies": [...]}` and swaps it in. Returns the count.
    pub fn load_document(&self, json: &str) -> Result<usize, PolicyLoadError> {
        let document: PolicyDocument = serde_json::from_str(json)?;
        let count = document.policies.len();
        self.replace(document.policies);
        Ok(count)
    }

    pub fn load_file(&self, path: &str) -> Result<usize, PolicyLoadError> {
        let json = std::fs::read_to_string(path)?;
        self.load_document(&json)
    }

    /// Most-specific-first match on `(method, path)`.
    pub fn match_policy(&self, method: &str, path: &str) -> Option<Policy> {
        let active = self
            .active
            .read()
            .expect("policy registry lock poisoned")
            .clone();
        active
            .iter()
            .find(|policy| {
                (policy.method == "*" || policy.method.eq_ignore_ascii_case(method))
                    && path_matches(&policy.path, path)
            })
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.active
            .read()
            .expect("policy registry lock poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|segment| !segment.is_empty())
}

/// Ranks patterns for match order: more literal segments beat wildcards,
/// longer patterns beat shorter ones.
fn specificity(pattern: &str) -> (usize, usize) {
    let mut literals = 0;
    let mut total = 0;
    for segment in segments(pattern) {
        total += 1;
        if segment != "*" && segment != "**" {
            literals += 1;
        }
    }
    (literals, total)
}

fn path_matches(pattern: &str, path: &str) -> bool {
    let pattern: Vec<&str> = segments(pattern).collect();
    let path: Vec<&str> = segments(path).collect();

    for (i, expected) in pattern.iter().enumerate() {
        if *expected == "**" {
            // Trailing ** swallows the rest, including nothing.
            return i == pattern.len() - 1;
        }
        match path.get(i) {
            Some(actual) if *expected == "*" || expected == actual => continue,
            _ => return false,
        }
    }
    pattern.len() == path.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{AllowlistStore, MemoryStore};
    use crate::types::{ClaimsSource, UnixTimestamp};
    use serde_json::json;

    const HOLDER: &str = "0xd8da6bf26964af9d7eed9e03e53415d37aa96045";
    const TOKEN: &str = "0x1f9840a85d5af5bf1d1762f925bdaddc4201f984";

    fn claims(scopes: &[&str]) -> Claims {
        Claims::new(
            HOLDER.parse().unwrap(),
            scopes.iter().map(|s| s.to_string()).collect(),
            ClaimsSource::SiweToken,
        )
    }

    fn erc20_rule(minimum: u64) -> Rule {
        Rule::Erc20MinBalance {
            chain_id: 1,
            token: TOKEN.parse().unwrap(),
            minimum: TokenAmount::from_u64(minimum),
        }
    }

    struct Fixture {
        cache: TtlCache,
        store: MemoryStore,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                cache: TtlCache::new(Duration::from_secs(300)),
                store: MemoryStore::new(),
            }
        }

        fn ctx(&self) -> PolicyContext<'_> {
            PolicyContext {
                chain: None,
                cache: &self.cache,
                store: &self.store,
                cache_ttl: Duration::from_secs(300),
            }
        }
    }

    #[test]
    fn rules_round_trip_through_the_document_format() {
        let json = json!({
            "policies": [{
                "path": "/api/data",
                "method": "GET",
                "logic": "AND",
                "rules": [
                    {"type": "has_scope", "scope": "read"},
                    {"type": "in_allowlist", "allowlist": "holders"},
                    {"type": "erc20_min_balance", "chain_id": 1, "token": TOKEN, "minimum": "1000"},
                    {"type": "erc721_owner", "chain_id": 1, "token": TOKEN, "token_id": 7}
                ]
            }]
        });
        let document: PolicyDocument = serde_json::from_value(json).unwrap();
        let policy = &document.policies[0];
        assert_eq!(policy.logic, Logic::And);
        assert_eq!(policy.rules.len(), 4);
        assert_eq!(policy.rules[0], Rule::HasScope { scope: "read".into() });
        assert!(matches!(&policy.rules[3], Rule::Erc721Owner { token_id, .. }
            if *token_id == TokenAmount::from_u64(7)));
    }

    #[tokio::test]
    async fn has_scope_is_pure_literal_membership() {
        let fixture = Fixture::new();
        let rule = Rule::HasScope { scope: "admin".into() };
        assert!(
            evaluate_rule(&rule, &claims(&["admin", "read"]), &fixture.ctx())
                .await
                .unwrap()
        );
        assert!(
            !evaluate_rule(&rule, &claims(&["read"]), &fixture.ctx())
                .await
                .unwrap()
        );
        assert!(
            !evaluate_rule(&rule, &claims(&["admin:*"]), &fixture.ctx())
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn inline_allowlist_matches_case_insensitively() {
        let fixture = Fixture::new();
        let rule = Rule::InAllowlist {
            allowlist: None,
            addresses: vec![
                "0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045".parse().unwrap(),
            ],
        };
        assert!(
            evaluate_rule(&rule, &claims(&[]), &fixture.ctx())
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn stored_allowlist_is_consulted_by_name() {
        let fixture = Fixture::new();
        let list = fixture
            .store
            .create_allowlist("holders", "", UnixTimestamp(1))
            .await
            .unwrap();
        fixture
            .store
            .add_allowlist_entry(list.id, &HOLDER.parse().unwrap(), UnixTimestamp(1))
            .await
            .unwrap();

        let member = Rule::InAllowlist {
            allowlist: Some("holders".into()),
            addresses: vec![],
        };
        let absent = Rule::InAllowlist {
            allowlist: Some("nobody".into()),
            addresses: vec![],
        };
        assert!(evaluate_rule(&member, &claims(&[]), &fixture.ctx()).await.unwrap());
        assert!(!evaluate_rule(&absent, &claims(&[]), &fixture.ctx()).await.unwrap());
    }

    #[tokio::test]
    async fn cached_erc20_balance_decides_without_chain_io() {
        let fixture = Fixture::new();
        // No chain client configured: a cache miss would fail loudly, so a
        // clean decision proves the read came from the cache.
        fixture.cache.set(
            &format!("erc20_balance:1:{TOKEN}:{HOLDER}"),
            json!("500"),
            Duration::from_secs(300),
        );

        let denies = evaluate_rule(&erc20_rule(1000), &claims(&[]), &fixture.ctx())
            .await
            .unwrap();
        assert!(!denies);
        let admits = evaluate_rule(&erc20_rule(500), &claims(&[]), &fixture.ctx())
            .await
            .unwrap();
        assert!(admits);
    }

    #[tokio::test]
    async fn cached_erc721_owner_is_shared_across_users_and_compared_case_insensitively() {
        let fixture = Fixture::new();
        // Deliberately user-independent key, holding a checksummed spelling.
        fixture.cache.set(
            &format!("erc721_owner:1:{TOKEN}:7"),
            json!("0xd8da6bf26964af9d7eed9e03e53415d37aa96045"),
            Duration::from_secs(300),
        );
        let rule = Rule::Erc721Owner {
            chain_id: 1,
            token: TOKEN.parse().unwrap(),
            token_id: TokenAmount::from_u64(7),
        };
        assert!(evaluate_rule(&rule, &claims(&[]), &fixture.ctx()).await.unwrap());

        let stranger = Claims::new(
            "0x0000000000000000000000000000000000000001".parse().unwrap(),
            vec![],
            ClaimsSource::SiweToken,
        );
        assert!(!evaluate_rule(&rule, &stranger, &fixture.ctx()).await.unwrap());
    }

    #[tokio::test]
    async fn erc20_rule_reads_through_the_cache_once() {
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": 1,
                // 2000 base units
                "result": "0x00000000000000000000000000000000000000000000000000000000000007d0",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let chain = crate::chain::ChainClient::new(
            server.uri().parse().unwrap(),
            None,
            1,
            Duration::from_secs(2),
        )
        .unwrap();
        let fixture = Fixture::new();
        let ctx = PolicyContext {
            chain: Some(&chain),
            cache: &fixture.cache,
            store: &fixture.store,
            cache_ttl: Duration::from_secs(300),
        };

        // Miss: one chain call, result cached, decision positive.
        assert!(evaluate_rule(&erc20_rule(1000), &claims(&[]), &ctx).await.unwrap());
        // Hit: the mock's expect(1) fails the test if this talks to it.
        assert!(evaluate_rule(&erc20_rule(2000), &claims(&[]), &ctx).await.unwrap());
        assert!(!evaluate_rule(&erc20_rule(2001), &claims(&[]), &ctx).await.unwrap());
    }

    #[tokio::test]
    async fn missing_chain_client_is_a_fault_not_a_denial() {
        let fixture = Fixture::new();
        let result = evaluate_rule(&erc20_rule(1), &claims(&[]), &fixture.ctx()).await;
        assert!(matches!(result, Err(PolicyError::NoChainClient)));
    }

    #[tokio::test]
    async fn and_combinator_short_circuits_on_false_and_on_error() {
        let fixture = Fixture::new();
        let policy = Policy {
            path: "/api/data".into(),
            method: "GET".into(),
            logic: Logic::And,
            rules: vec![
                Rule::HasScope { scope: "read".into() },
                Rule::HasScope { scope: "admin".into() },
                // Would fault, but the false above must stop evaluation first.
                erc20_rule(1),
            ],
        };
        let evaluation = evaluate_policy(&policy, &claims(&["read"]), &fixture.ctx()).await;
        assert!(!evaluation.allowed);
        assert!(evaluation.error.is_none());
        assert_eq!(evaluation.trace.len(), 2);

        // Error path: scope passes, chain rule faults, AND fails closed.
        let faulting = Policy {
            path: "/api/data".into(),
            method: "GET".into(),
            logic: Logic::And,
            rules: vec![Rule::HasScope { scope: "read".into() }, erc20_rule(1)],
        };
        let evaluation = evaluate_policy(&faulting, &claims(&["read"]), &fixture.ctx()).await;
        assert!(!evaluation.allowed);
        assert!(matches!(evaluation.error, Some(PolicyError::NoChainClient)));
    }

    #[tokio::test]
    async fn or_combinator_lets_a_later_success_override_an_earlier_error() {
        let fixture = Fixture::new();
        let policy = Policy {
            path: "/api/data".into(),
            method: "GET".into(),
            logic: Logic::Or,
            rules: vec![
                erc20_rule(1), // faults: no chain client
                Rule::HasScope { scope: "admin".into() },
            ],
        };
        let evaluation = evaluate_policy(&policy, &claims(&["admin"]), &fixture.ctx()).await;
        assert!(evaluation.allowed);
        assert!(evaluation.error.is_none());
        assert_eq!(evaluation.trace.len(), 2);
        assert!(evaluation.trace[0].error.is_some());
        assert_eq!(evaluation.trace[1].passed, Some(true));
    }

    #[tokio::test]
    async fn or_combinator_surfaces_the_first_error_when_nothing_succeeds() {
        let fixture = Fixture::new();
        let policy = Policy {
            path: "/api/data".into(),
            method: "GET".into(),
            logic: Logic::Or,
            rules: vec![erc20_rule(1), Rule::HasScope { scope: "admin".into() }],
        };
        let evaluation = evaluate_policy(&policy, &claims(&["read"]), &fixture.ctx()).await;
        assert!(!evaluation.allowed);
        assert!(matches!(evaluation.error, Some(PolicyError::NoChainClient)));
    }

    #[tokio::test]
    async fn empty_rule_lists_follow_the_combinator_identities() {
        let fixture = Fixture::new();
        let and_empty = Policy {
            path: "/".into(),
            method: "*".into(),
            logic: Logic::And,
            rules: vec![],
        };
        assert!(evaluate_policy(&and_empty, &claims(&[]), &fixture.ctx()).await.allowed);

        let or_empty = Policy {
            path: "/".into(),
            method: "*".into(),
            logic: Logic::Or,
            rules: vec![],
        };
        assert!(!evaluate_policy(&or_empty, &claims(&[]), &fixture.ctx()).await.allowed);
    }

    #[test]
    fn registry_matches_most_specific_pattern_first() {
        let registry = PolicyRegistry::new(true, false);
        registry.replace(vec![
            Policy {
                path: "/api/**".into(),
                method: "*".into(),
                logic: Logic::Or,
                rules: vec![],
            },
            Policy {
                path: "/api/data".into(),
                method: "GET".into(),
                logic: Logic::And,
                rules: vec![Rule::HasScope { scope: "read".into() }],
            },
            Policy {
                path: "/api/*".into(),
                method: "GET".into(),
                logic: Logic::Or,
                rules: vec![],
            },
        ]);

        let matched = registry.match_policy("GET", "/api/data").unwrap();
        assert_eq!(matched.path, "/api/data");
        let sibling = registry.match_policy("GET", "/api/other").unwrap();
        assert_eq!(sibling.path, "/api/*");
        let nested = registry.match_policy("POST", "/api/a/b").unwrap();
        assert_eq!(nested.path, "/api/**");
        assert!(registry.match_policy("GET", "/health").is_none());
    }

    #[test]
    fn method_matching_is_exact_or_wildcard() {
        let registry = PolicyRegistry::new(true, false);
        registry.replace(vec![Policy {
            path: "/api/keys".into(),
            method: "POST".into(),
            logic: Logic::And,
            rules: vec![],
        }]);
        assert!(registry.match_policy("POST", "/api/keys").is_some());
        assert!(registry.match_policy("post", "/api/keys").is_some());
        assert!(registry.match_policy("GET", "/api/keys").is_none());
    }

    #[test]
    fn replace_is_atomic_and_total() {
        let registry = PolicyRegistry::new(true, false);
        registry
            .load_document(
                &json!({"policies": [{"path": "/api/data", "method": "GET", "logic": "AND",
                    "rules": [{"type": "has_scope", "scope": "read"}]}]})
                .to_string(),
            )
            .unwrap();
        assert_eq!(registry.len(), 1);

        registry.replace(vec![]);
        assert!(registry.is_empty());
        assert!(registry.match_policy("GET", "/api/data").is_none());
    }

    #[test]
    fn malformed_documents_are_rejected_wholesale() {
        let registry = PolicyRegistry::new(true, false);
        registry
            .load_document(&json!({"policies": []}).to_string())
            .unwrap();
        assert!(registry.load_document("{not json").is_err());
        assert!(
            registry
                .load_document(&json!({"policies": [{"path": "/x"}]}).to_string())
                .is_err()
        );
        // The active set is untouched by failed loads.
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn path_pattern_semantics() {
        assert!(path_matches("/api/data", "/api/data"));
        assert!(!path_matches("/api/data", "/api/data/x"));
        assert!(path_matches("/api/*", "/api/data"));
        assert!(!path_matches("/api/*", "/api/a/b"));
        assert!(path_matches("/api/**", "/api"));
        assert!(path_matches("/api/**", "/api/a/b/c"));
        assert!(!path_matches("/api/**", "/other"));
        assert!(path_matches("/api/keys/*", "/api/keys/123"));
    }
}
