//! Normalization of heterogeneous target specifications into the
//! serial/parallel forking order used by the proxy.
//!
//! A specification may be a single URI, a string of comma separated
//! URIs, a flat list, or a nested list. The normal form is an ordered
//! sequence of groups: groups are tried one after another, the URIs
//! inside a group are forked in parallel.

use crate::rsip_ext::parse_uris;

/// Normalized target set: serial groups of parallel URIs.
pub type UriSet = Vec<Vec<rsip::Uri>>;

/// A user-supplied target specification before normalization.
#[derive(Debug, Clone)]
pub enum TargetSpec {
    Uri(rsip::Uri),
    Str(String),
    List(Vec<TargetSpec>),
}

/// Canonicalize a target specification.
///
/// * a single URI becomes one group of one
/// * a string becomes one group with its parsed URIs
/// * a flat list concatenates everything into one parallel group
/// * a list containing at least one nested list becomes one group per
///   element ("multi" mode); plain strings and URIs then form their
///   own group
/// * anything unparsable yields `[[]]`, the "no routable target"
///   sentinel
///
/// ```
/// use sipcall::proxy::uri_set::{normalize, TargetSpec};
///
/// let set = normalize(&TargetSpec::from("sip:a@example.com"));
/// assert_eq!(set.len(), 1);
/// assert_eq!(set[0].len(), 1);
/// ```
pub fn normalize(spec: &TargetSpec) -> UriSet {
    match spec {
        TargetSpec::Uri(uri) => vec![vec![uri.clone()]],
        TargetSpec::Str(line) => match parse_uris(line) {
            Ok(uris) if !uris.is_empty() => vec![uris],
            _ => vec![vec![]],
        },
        TargetSpec::List(items) => {
            if items.is_empty() {
                return vec![vec![]];
            }
            if items.iter().any(|i| matches!(i, TargetSpec::List(_))) {
                normalize_multi(items)
            } else {
                match flatten_group(items) {
                    Some(uris) => vec![uris],
                    None => vec![vec![]],
                }
            }
        }
    }
}

fn normalize_multi(items: &[TargetSpec]) -> UriSet {
    let mut groups = Vec::with_capacity(items.len());
    for item in items {
        match item {
            TargetSpec::Uri(uri) => groups.push(vec![uri.clone()]),
            TargetSpec::Str(line) => match parse_uris(line) {
                Ok(uris) => groups.push(uris),
                Err(_) => return vec![vec![]],
            },
            TargetSpec::List(inner) => match flatten_group(inner) {
                Some(uris) => groups.push(uris),
                None => return vec![vec![]],
            },
        }
    }
    groups
}

/// Concatenate the URIs of one group; `None` when any member fails to
/// parse.
fn flatten_group(items: &[TargetSpec]) -> Option<Vec<rsip::Uri>> {
    let mut uris = Vec::with_capacity(items.len());
    for item in items {
        match item {
            TargetSpec::Uri(uri) => uris.push(uri.clone()),
            TargetSpec::Str(line) => uris.extend(parse_uris(line).ok()?),
            TargetSpec::List(inner) => uris.extend(flatten_group(inner)?),
        }
    }
    Some(uris)
}

impl From<rsip::Uri> for TargetSpec {
    fn from(value: rsip::Uri) -> Self {
        TargetSpec::Uri(value)
    }
}

impl From<&str> for TargetSpec {
    fn from(value: &str) -> Self {
        TargetSpec::Str(value.to_string())
    }
}

impl From<String> for TargetSpec {
    fn from(value: String) -> Self {
        TargetSpec::Str(value)
    }
}

impl From<Vec<TargetSpec>> for TargetSpec {
    fn from(value: Vec<TargetSpec>) -> Self {
        TargetSpec::List(value)
    }
}

impl From<Vec<rsip::Uri>> for TargetSpec {
    fn from(value: Vec<rsip::Uri>) -> Self {
        TargetSpec::List(value.into_iter().map(TargetSpec::Uri).collect())
    }
}

impl From<&UriSet> for TargetSpec {
    fn from(value: &UriSet) -> Self {
        TargetSpec::List(
            value
                .iter()
                .map(|group| {
                    TargetSpec::List(group.iter().cloned().map(TargetSpec::Uri).collect())
                })
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uri(s: &str) -> rsip::Uri {
        rsip::Uri::try_from(s).unwrap()
    }

    #[test]
    fn test_empty_list() {
        let set = normalize(&TargetSpec::List(vec![]));
        assert_eq!(set, vec![vec![]]);
    }

    #[test]
    fn test_single_string() {
        let set = normalize(&"sip:a@example.com".into());
        assert_eq!(set, vec![vec![uri("sip:a@example.com")]]);
    }

    #[test]
    fn test_single_uri() {
        let set = normalize(&TargetSpec::Uri(uri("sips:a@example.com")));
        assert_eq!(set, vec![vec![uri("sips:a@example.com")]]);
    }

    #[test]
    fn test_comma_separated_string() {
        let set = normalize(&"sip:a@example.com, sip:b@example.com".into());
        assert_eq!(
            set,
            vec![vec![uri("sip:a@example.com"), uri("sip:b@example.com")]]
        );
    }

    #[test]
    fn test_flat_list_is_one_group() {
        let spec = TargetSpec::List(vec![
            "sip:a@example.com".into(),
            "sip:b@example.com".into(),
            TargetSpec::Uri(uri("sip:c@example.com")),
            "sip:d@example.com".into(),
            "sip:e@example.com".into(),
        ]);
        let set = normalize(&spec);
        assert_eq!(
            set,
            vec![vec![
                uri("sip:a@example.com"),
                uri("sip:b@example.com"),
                uri("sip:c@example.com"),
                uri("sip:d@example.com"),
                uri("sip:e@example.com"),
            ]]
        );
    }

    #[test]
    fn test_nested_list_forms_groups() {
        let spec = TargetSpec::List(vec![
            "sip:a@example.com".into(),
            TargetSpec::List(vec![
                "sip:b@example.com".into(),
                TargetSpec::Uri(uri("sip:c@example.com")),
            ]),
            "sip:d@example.com".into(),
            TargetSpec::List(vec!["sip:e@example.com".into()]),
        ]);
        let set = normalize(&spec);
        assert_eq!(
            set,
            vec![
                vec![uri("sip:a@example.com")],
                vec![uri("sip:b@example.com"), uri("sip:c@example.com")],
                vec![uri("sip:d@example.com")],
                vec![uri("sip:e@example.com")],
            ]
        );
    }

    #[test]
    fn test_leading_group() {
        let spec = TargetSpec::List(vec![
            TargetSpec::List(vec![
                "sip:a@example.com".into(),
                "sip:b@example.com".into(),
                TargetSpec::Uri(uri("sip:c@example.com")),
            ]),
            "sip:d@example.com".into(),
            "sip:e@example.com".into(),
        ]);
        let set = normalize(&spec);
        assert_eq!(
            set,
            vec![
                vec![
                    uri("sip:a@example.com"),
                    uri("sip:b@example.com"),
                    uri("sip:c@example.com"),
                ],
                vec![uri("sip:d@example.com")],
                vec![uri("sip:e@example.com")],
            ]
        );
    }

    #[test]
    fn test_junk_is_unroutable() {
        assert_eq!(normalize(&"".into()), vec![vec![]]);
        assert_eq!(normalize(&"http://example.com".into()), vec![vec![]]);
        let spec = TargetSpec::List(vec!["sip:a@example.com".into(), "###".into()]);
        assert_eq!(normalize(&spec), vec![vec![]]);
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let specs: Vec<TargetSpec> = vec![
            "sip:a@example.com".into(),
            TargetSpec::List(vec![]),
            TargetSpec::List(vec![
                "sip:a@example.com".into(),
                TargetSpec::List(vec!["sip:b@example.com".into()]),
            ]),
            TargetSpec::List(vec![
                "sip:a@example.com, sip:b@example.com".into(),
                "sip:c@example.com".into(),
            ]),
        ];
        for spec in specs {
            let once = normalize(&spec);
            let twice = normalize(&TargetSpec::from(&once));
            assert_eq!(once, twice);
        }
    }
}
