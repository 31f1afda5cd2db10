//! Series renaming functions

use super::{ArgKind, ArgValue, CallArgs, FunctionDef, FunctionRegistry, Signature};
use crate::query::error::{QueryError, QueryResult};
use crate::types::{Series, SeriesList};
use regex::Regex;

pub(super) fn register(registry: &mut FunctionRegistry) {
    registry.insert(FunctionDef::new(
        Signature::new("alias", ArgKind::SeriesList)
            .param("series", ArgKind::SeriesList)
            .param("name", ArgKind::String),
        |_, mut args| {
            let name = args.string(1)?.to_string();
            Ok(ArgValue::SeriesList(alias(args.series(0)?, &name)))
        },
    ));
    registry.insert(FunctionDef::new(
        Signature::new("aliasByMetric", ArgKind::SeriesList).param("series", ArgKind::SeriesList),
        |_, mut args| Ok(ArgValue::SeriesList(alias_by_metric(args.series(0)?))),
    ));
    registry.insert(FunctionDef::new(
        Signature::new("aliasByNode", ArgKind::SeriesList)
            .param("series", ArgKind::SeriesList)
            .variadic("nodes", ArgKind::NodeIndexList),
        |_, mut args: CallArgs| {
            let nodes = args.node_indexes(1)?;
            alias_by_node(args.series(0)?, &nodes).map(ArgValue::SeriesList)
        },
    ));
    registry.insert(FunctionDef::new(
        Signature::new("aliasSub", ArgKind::SeriesList)
            .param("series", ArgKind::SeriesList)
            .param("search", ArgKind::String)
            .param("replace", ArgKind::String),
        |_, mut args| {
            let search = args.string(1)?.to_string();
            let replace = args.string(2)?.to_string();
            alias_sub(args.series(0)?, &search, &replace).map(ArgValue::SeriesList)
        },
    ));
}

/// Set every series' specification to `name`
pub fn alias(list: SeriesList, name: &str) -> SeriesList {
    list.map(|s| s.with_specification(name))
}

/// Rename every series to the last node of its metric path
pub fn alias_by_metric(list: SeriesList) -> SeriesList {
    list.map(|s| {
        let name = metric_path(&s.id).rsplit('.').next().unwrap_or_default().to_string();
        s.with_specification(name)
    })
}

/// Rename every series to the selected nodes of its metric path, joined by `.`
///
/// Negative indexes count from the last node.
pub fn alias_by_node(list: SeriesList, nodes: &[i64]) -> QueryResult<SeriesList> {
    list.try_map(|s| {
        let name = select_nodes(&s, nodes)?;
        Ok(s.with_specification(name))
    })
}

fn select_nodes(series: &Series, nodes: &[i64]) -> QueryResult<String> {
    let parts: Vec<&str> = metric_path(&series.id).split('.').collect();
    let len = parts.len() as i64;

    let mut selected = Vec::with_capacity(nodes.len());
    for &node in nodes {
        let index = if node < 0 { len + node } else { node };
        if !(0..len).contains(&index) {
            return Err(QueryError::execution(format!(
                "aliasByNode: node {} out of range for '{}' ({} nodes)",
                node, series.id, len
            )));
        }
        selected.push(parts[index as usize]);
    }
    Ok(selected.join("."))
}

/// Rename every series by a regex search and replace over its identifier
///
/// Graphite-style `\1` back-references in `replace` are accepted.
pub fn alias_sub(list: SeriesList, search: &str, replace: &str) -> QueryResult<SeriesList> {
    let regex = Regex::new(search).map_err(|e| {
        QueryError::validation(format!("aliasSub: invalid pattern '{}'", search)).with_source(e)
    })?;
    let replace = expand_backrefs(replace);
    Ok(list.map(|s| {
        let name = regex.replace_all(&s.id, replace.as_str()).into_owned();
        s.with_specification(name)
    }))
}

// `\1` becomes `${1}` so a following literal digit or letter is not absorbed
// into the group name
fn expand_backrefs(replace: &str) -> String {
    let mut out = String::with_capacity(replace.len() + 4);
    let mut chars = replace.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' && chars.peek().is_some_and(|d| d.is_ascii_digit()) {
            out.push_str("${");
            while let Some(d) = chars.peek().copied().filter(char::is_ascii_digit) {
                out.push(d);
                chars.next();
            }
            out.push('}');
        } else if c == '$' {
            out.push_str("$$");
        } else {
            out.push(c);
        }
    }
    out
}

/// Strip function wrappers from a rendered series name, e.g.
/// `scale(a.b.c,2)` gives `a.b.c`
fn metric_path(name: &str) -> &str {
    let inner = name.rsplit('(').next().unwrap_or(name);
    inner.split([',', ')']).next().unwrap_or(inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::error::QueryErrorKind;

    fn list(ids: &[&str]) -> SeriesList {
        ids.iter().map(|id| Series::new(*id, Vec::new())).collect::<Vec<_>>().into()
    }

    fn names(list: &SeriesList) -> Vec<&str> {
        list.iter().map(|s| s.specification.as_str()).collect()
    }

    #[test]
    fn test_alias_keeps_cardinality() {
        let out = alias(list(&["a.b", "c.d"]), "x");
        assert_eq!(names(&out), vec!["x", "x"]);
        assert_eq!(out.values[1].id, "c.d");
    }

    #[test]
    fn test_alias_by_metric() {
        let out = alias_by_metric(list(&["servers.web01.cpu", "scale(a.b.mem,2)", "flat"]));
        assert_eq!(names(&out), vec!["cpu", "mem", "flat"]);
    }

    #[test]
    fn test_alias_by_node() {
        let out = alias_by_node(list(&["a.b.c"]), &[0, 1]).unwrap();
        assert_eq!(names(&out), vec!["a.b"]);

        let out = alias_by_node(list(&["a.b.c"]), &[-1]).unwrap();
        assert_eq!(names(&out), vec!["c"]);

        let out = alias_by_node(list(&["a.b.c"]), &[2, 0]).unwrap();
        assert_eq!(names(&out), vec!["c.a"]);
    }

    #[test]
    fn test_alias_by_node_out_of_range() {
        let err = alias_by_node(list(&["a.b.c"]), &[3]).unwrap_err();
        assert_eq!(err.kind, QueryErrorKind::ExecutionError);
        assert!(alias_by_node(list(&["a.b.c"]), &[-4]).is_err());
    }

    #[test]
    fn test_alias_sub() {
        let out = alias_sub(list(&["servers.web01.cpu"]), r"servers\.(\w+)\.(\w+)", r"\2-\1").unwrap();
        assert_eq!(names(&out), vec!["cpu-web01"]);

        let out = alias_sub(list(&["a.b"]), r"^(a)", r"\1x$").unwrap();
        assert_eq!(names(&out), vec!["ax$.b"]);
    }

    #[test]
    fn test_alias_sub_invalid_pattern() {
        let err = alias_sub(list(&["a.b"]), "(", "x").unwrap_err();
        assert_eq!(err.kind, QueryErrorKind::ValidationError);
    }

    #[test]
    fn test_metric_path() {
        assert_eq!(metric_path("a.b.c"), "a.b.c");
        assert_eq!(metric_path("alias(scale(a.b,2),\"x\")"), "a.b");
    }
}
