//! Backend selection for L7 proxy endpoints

use l7lb_api::{Backend, BucketMap, Frontend};

/// Bucket key used when no port filter applies
pub const WILDCARD_PORT: &str = "*";

/// Returns the preferred backends, or all backends if none is preferred.
pub fn filter_preferred_backends(backends: &[Backend]) -> Vec<Backend> {
    let preferred: Vec<Backend> = backends.iter().filter(|b| b.preferred).cloned().collect();
    if preferred.is_empty() {
        backends.to_vec()
    } else {
        preferred
    }
}

/// Groups `backends` by the front-end ports in `only_ports`.
///
/// - An empty filter yields a single `"*"` bucket with every backend.
/// - An entry equal to the frontend's numeric port wins over everything
///   else: the result is that single bucket holding every backend, and all
///   other entries, including named buckets already collected, are dropped.
///   Entries are compared as parsed `u16` values, so `"080"` and `"+80"` match
///   port 80 too; the bucket key stays the literal entry.
/// - Any other entry is a port name and collects the backends serving it.
///   Names without a matching backend are left out of the map.
pub fn filter_service_backends(
    frontend: &Frontend,
    backends: &[Backend],
    only_ports: &[String],
) -> BucketMap {
    let mut res = BucketMap::new();
    if only_ports.is_empty() {
        res.insert(WILDCARD_PORT.to_string(), backends.to_vec());
        return res;
    }

    for port in only_ports {
        if port.parse::<u16>().ok() == Some(frontend.port) {
            return BucketMap::from([(port.clone(), backends.to_vec())]);
        }

        for backend in backends.iter().filter(|b| &b.fe_port_name == port) {
            res.entry(port.clone()).or_default().push(backend.clone());
        }
    }

    res
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(address: &str, port_name: &str, preferred: bool) -> Backend {
        Backend {
            address: address.to_string(),
            port: 8080,
            fe_port_name: port_name.to_string(),
            preferred,
        }
    }

    fn frontend(port: u16) -> Frontend {
        Frontend { port, port_name: None }
    }

    fn ports(p: &[&str]) -> Vec<String> {
        p.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_no_preferred_returns_all() {
        let backends = vec![backend("10.0.0.1", "web", false), backend("10.0.0.2", "web", false)];
        assert_eq!(filter_preferred_backends(&backends), backends);
    }

    #[test]
    fn test_preferred_only() {
        let a = backend("10.0.0.1", "web", true);
        let b = backend("10.0.0.2", "web", false);
        assert_eq!(filter_preferred_backends(&[a.clone(), b]), vec![a]);
    }

    #[test]
    fn test_preferred_keeps_order() {
        let a = backend("10.0.0.1", "web", true);
        let b = backend("10.0.0.2", "web", false);
        let c = backend("10.0.0.3", "web", true);
        assert_eq!(filter_preferred_backends(&[a.clone(), b, c.clone()]), vec![a, c]);
    }

    #[test]
    fn test_empty_backends() {
        assert!(filter_preferred_backends(&[]).is_empty());
    }

    #[test]
    fn test_empty_filter_is_wildcard() {
        let backends = vec![backend("10.0.0.1", "web", false), backend("10.0.0.2", "metrics", false)];
        let res = filter_service_backends(&frontend(80), &backends, &[]);

        assert_eq!(res.len(), 1);
        assert_eq!(res["*"], backends);
    }

    #[test]
    fn test_numeric_port_wins_over_named() {
        let backends = vec![backend("10.0.0.1", "web", false), backend("10.0.0.2", "metrics", false)];
        let res = filter_service_backends(&frontend(80), &backends, &ports(&["80", "web"]));

        assert_eq!(res.len(), 1);
        assert_eq!(res["80"], backends);
    }

    #[test]
    fn test_numeric_port_discards_earlier_named_buckets() {
        let backends = vec![backend("10.0.0.1", "web", false), backend("10.0.0.2", "metrics", false)];
        let res = filter_service_backends(&frontend(80), &backends, &ports(&["web", "80"]));

        assert_eq!(res.len(), 1);
        assert!(!res.contains_key("web"));
        assert_eq!(res["80"], backends);
    }

    #[test]
    fn test_named_port_bucketing() {
        let a = backend("10.0.0.1", "web", false);
        let b = backend("10.0.0.2", "metrics", false);
        let res = filter_service_backends(&frontend(80), &[a.clone(), b], &ports(&["web"]));

        assert_eq!(res.len(), 1);
        assert_eq!(res["web"], vec![a]);
        assert!(!res.contains_key("*"));
    }

    #[test]
    fn test_named_ports_without_match_are_absent() {
        let a = backend("10.0.0.1", "web", false);
        let b = backend("10.0.0.2", "metrics", false);
        let res = filter_service_backends(
            &frontend(80),
            &[a.clone(), b.clone()],
            &ports(&["grpc", "metrics", "web"]),
        );

        assert_eq!(res.len(), 2);
        assert!(!res.contains_key("grpc"));
        assert_eq!(res["metrics"], vec![b]);
        assert_eq!(res["web"], vec![a]);
    }

    #[test]
    fn test_numeric_port_not_matching_frontend_is_a_name() {
        let a = backend("10.0.0.1", "web", false);
        let res = filter_service_backends(&frontend(80), &[a], &ports(&["8080"]));
        assert!(res.is_empty());
    }

    #[test]
    fn test_numeric_port_parsed_as_integer() {
        let backends = vec![backend("10.0.0.1", "web", false)];
        let res = filter_service_backends(&frontend(80), &backends, &ports(&["080"]));
        assert_eq!(res["080"], backends);

        let res = filter_service_backends(&frontend(80), &backends, &ports(&["+80", "web"]));
        assert_eq!(res.len(), 1);
        assert_eq!(res["+80"], backends);
    }
}
