use crate::registry::Registry;

pub const IDENTITY_DELIMITER: &str = "->";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route<'a> {
    pub index: usize,
    pub payload: &'a str,
}

/// Resolve `raw` to a line index and payload. Splits on the first delimiter only,
/// so payloads may themselves contain `->`.
pub fn route<'a>(registry: &Registry, raw: &'a str) -> Option<Route<'a>> {
    let (identity, payload) = raw.split_once(IDENTITY_DELIMITER)?;
    let index = registry.index_of(identity)?;
    Some(Route { index, payload })
}

#[cfg(test)]
mod tests {
    use super::{route, Route};
    use crate::patterns::PatternTable;
    use crate::registry::Registry;
    use crate::tracker::BarStyle;
    use std::sync::Arc;

    fn registry() -> Registry {
        let ids = ["w1", "w2", "0:100"]
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>();
        Registry::with_style(
            &ids,
            Arc::new(PatternTable::default()),
            Arc::new(BarStyle::default()),
        )
        .expect("registry")
    }

    #[test]
    fn known_identity_routes_to_its_index() {
        let reg = registry();
        assert_eq!(
            route(&reg, "w2->processed 4"),
            Some(Route {
                index: 1,
                payload: "processed 4"
            })
        );
        assert_eq!(
            route(&reg, "0:100->worker is 0:100"),
            Some(Route {
                index: 2,
                payload: "worker is 0:100"
            })
        );
    }

    #[test]
    fn only_the_first_delimiter_splits() {
        let reg = registry();
        let routed = route(&reg, "w1->a->b->c").expect("routed");
        assert_eq!(routed.index, 0);
        assert_eq!(routed.payload, "a->b->c");
    }

    #[test]
    fn unknown_or_undelimited_messages_do_not_route() {
        let reg = registry();
        assert_eq!(route(&reg, "w9->processed 0"), None);
        assert_eq!(route(&reg, "processed 0"), None);
        assert_eq!(route(&reg, ""), None);
        assert_eq!(route(&reg, "->processed 0"), None);
        assert_eq!(route(&reg, "w1 -> processed 0"), None);
    }

    #[test]
    fn empty_payload_still_routes() {
        let reg = registry();
        assert_eq!(route(&reg, "w1->").map(|r| r.payload), Some(""));
    }
}
