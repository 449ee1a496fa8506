//! EntityMatcher : rattache un enregistrement externe à un nœud existant
//! par égalité stricte entre clé d'identité et nom affiché. Pas de fuzzy matching.

use crate::ports::{NodeRef, TicketRef, WorkflowStep};

/// Tout ce qui expose un nom affiché comparable à une clé d'identité
pub trait Named {
    fn display_name(&self) -> &str;
}

impl Named for NodeRef {
    fn display_name(&self) -> &str {
        &self.name
    }
}

impl Named for TicketRef {
    fn display_name(&self) -> &str {
        &self.name
    }
}

impl Named for WorkflowStep {
    fn display_name(&self) -> &str {
        &self.name
    }
}

/// Premier candidat dont le nom vaut exactement `identity_key`, sinon `None` (NotFound)
pub fn find<'a, T, I>(identity_key: &str, candidates: I) -> Option<&'a T>
where
    T: Named + 'a,
    I: IntoIterator<Item = &'a T>,
{
    candidates
        .into_iter()
        .find(|candidate| candidate.display_name() == identity_key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::NodeId;

    fn node(name: &str) -> NodeRef {
        NodeRef {
            id: NodeId::from(format!("id-{name}")),
            name: name.to_string(),
            node_type: "BmsDevice".to_string(),
        }
    }

    #[test]
    fn test_exact_match_only() {
        let nodes = vec![node("D1"), node("D10"), node("d1")];
        assert_eq!(find("D1", &nodes).map(|n| n.id.as_str()), Some("id-D1"));
        assert_eq!(find("d1", &nodes).map(|n| n.id.as_str()), Some("id-d1"));
        assert!(find("D", &nodes).is_none());
        assert!(find("D1 ", &nodes).is_none());
    }

    #[test]
    fn test_find_over_chained_candidates() {
        let snapshot = vec![node("D1")];
        let created = vec![node("D2")];
        let found = find("D2", snapshot.iter().chain(created.iter()));
        assert_eq!(found.map(|n| n.name.as_str()), Some("D2"));
    }

    #[test]
    fn test_empty_candidates() {
        let nodes: Vec<NodeRef> = Vec::new();
        assert!(find("anything", &nodes).is_none());
    }
}
