//! Route lookup and dispatch.
//!
//! # Responsibilities
//! - Store compiled routes in evaluation order
//! - Look up the first route matching a request
//! - Skip routes whose cluster does not resolve
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - Evaluation order: `order` ascending, then specificity descending, then id
//! - O(n) scan; each route's matcher is compiled once per snapshot

use std::cmp::Reverse;
use std::sync::Arc;

use crate::config::schema::RouteConfig;
use crate::http::ProxyRequest;
use crate::routing::matcher::RouteMatcher;
use crate::routing::pattern::RouteValues;
use crate::transforms::TransformPipeline;

/// A route compiled for one snapshot.
#[derive(Debug)]
pub struct Route {
    config: RouteConfig,
    matcher: RouteMatcher,
    transforms: TransformPipeline,
}

impl Route {
    /// Compile a route, collecting every matcher and transform error.
    pub fn compile(config: RouteConfig) -> Result<Self, Vec<String>> {
        let matcher = RouteMatcher::compile(&config.match_criteria);
        let transforms = TransformPipeline::build(&config.transforms);
        match (matcher, transforms) {
            (Ok(matcher), Ok(transforms)) => Ok(Self {
                config,
                matcher,
                transforms,
            }),
            (matcher, transforms) => Err(matcher
                .err()
                .into_iter()
                .flatten()
                .chain(transforms.err().into_iter().flatten())
                .collect()),
        }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn cluster_id(&self) -> &str {
        &self.config.cluster_id
    }

    pub fn config(&self) -> &RouteConfig {
        &self.config
    }

    pub fn transforms(&self) -> &TransformPipeline {
        &self.transforms
    }

    pub fn match_request(&self, req: &ProxyRequest) -> Option<RouteValues> {
        self.matcher.match_request(req)
    }
}

/// Routes in evaluation order.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: Vec<Arc<Route>>,
}

impl RouteTable {
    pub fn new(mut routes: Vec<Route>) -> Self {
        routes.sort_by(|a, b| {
            let key_a = (a.config.order, Reverse(a.matcher.specificity()), &a.config.id);
            let key_b = (b.config.order, Reverse(b.matcher.specificity()), &b.config.id);
            key_a.cmp(&key_b)
        });
        Self {
            routes: routes.into_iter().map(Arc::new).collect(),
        }
    }

    /// Routes in evaluation order.
    pub fn routes(&self) -> &[Arc<Route>] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// First route that matches `req` and whose cluster is reachable.
    pub fn find(
        &self,
        req: &ProxyRequest,
        cluster_exists: impl Fn(&str) -> bool,
    ) -> Option<(&Arc<Route>, RouteValues)> {
        self.routes
            .iter()
            .filter(|route| cluster_exists(route.cluster_id()))
            .find_map(|route| route.match_request(req).map(|values| (route, values)))
    }
}
