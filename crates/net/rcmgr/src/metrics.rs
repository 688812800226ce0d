use crate::{limits::Resource, scope::ScopeKind};

pub(crate) fn record_blocked(scope: ScopeKind, resource: Resource) {
    let scope: &'static str = scope.into();
    let resource: &'static str = resource.into();
    metrics::counter!("relayd_rcmgr_blocked_total", "scope" => scope, "resource" => resource)
        .increment(1);
}
