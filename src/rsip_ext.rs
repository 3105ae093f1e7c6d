use rsip::prelude::UntypedHeader;

pub trait RsipHeadersExt {
    fn push_front(&mut self, header: rsip::Header);
}

impl RsipHeadersExt for rsip::Headers {
    fn push_front(&mut self, header: rsip::Header) {
        let mut headers = self.iter().cloned().collect::<Vec<_>>();
        headers.insert(0, header);
        *self = headers.into();
    }
}

#[macro_export]
macro_rules! header_pop {
    ($iter:expr, $header:path) => {
        let mut first = true;
        $iter.retain(|h| {
            if first && matches!(h, $header(_)) {
                first = false;
                false
            } else {
                true
            }
        });
    };
}

pub fn extract_uri_from_contact(line: &str) -> crate::Result<rsip::Uri> {
    match rsip::headers::Contact::try_from(line) {
        Ok(contact) => {
            match contact.uri() {
                Ok(mut uri) => {
                    uri.params
                        .retain(|p| matches!(p, rsip::Param::Transport(_)));
                    return Ok(uri);
                }
                Err(_) => {}
            };
        }
        Err(_) => {}
    };

    match line.split('<').nth(1).and_then(|s| s.split('>').next()) {
        Some(uri) => rsip::Uri::try_from(uri).map_err(Into::into),
        None => Err(crate::Error::InvalidUri(format!("no uri found: {}", line))),
    }
}

/// Parse a comma separated list of routable URIs. Angle-bracketed forms
/// keep any commas inside the brackets intact. Every URI must carry a
/// sip or sips scheme.
pub fn parse_uris(line: &str) -> crate::Result<Vec<rsip::Uri>> {
    let mut uris = Vec::new();
    for part in split_outside_brackets(line) {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let raw = part
            .split('<')
            .nth(1)
            .and_then(|s| s.split('>').next())
            .unwrap_or(part);
        let uri = rsip::Uri::try_from(raw)
            .map_err(|_| crate::Error::InvalidUri(part.to_string()))?;
        if !matches!(uri.scheme, Some(rsip::Scheme::Sip) | Some(rsip::Scheme::Sips)) {
            return Err(crate::Error::InvalidUri(part.to_string()));
        }
        uris.push(uri);
    }
    Ok(uris)
}

fn split_outside_brackets(line: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (i, c) in line.char_indices() {
        match c {
            '<' => depth += 1,
            '>' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&line[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&line[start..]);
    parts
}

pub fn max_forwards_of(headers: &rsip::Headers) -> Option<&rsip::headers::MaxForwards> {
    headers.iter().find_map(|h| match h {
        rsip::Header::MaxForwards(mf) => Some(mf),
        _ => None,
    })
}

#[test]
fn test_rsip_headers_ext() {
    use rsip::{Header, Headers};
    let mut headers: Headers = vec![
        Header::Via("SIP/2.0/TCP".into()),
        Header::Via("SIP/2.0/UDP".into()),
        Header::Via("SIP/2.0/WSS".into()),
    ]
    .into();
    let via = Header::Via("SIP/2.0/TLS".into());
    headers.push_front(via);
    assert_eq!(headers.iter().count(), 4);

    header_pop!(headers, Header::Via);
    assert_eq!(headers.iter().count(), 3);

    assert_eq!(
        headers.iter().collect::<Vec<_>>(),
        vec![
            &Header::Via("SIP/2.0/TCP".into()),
            &Header::Via("SIP/2.0/UDP".into()),
            &Header::Via("SIP/2.0/WSS".into())
        ]
    );
}

#[test]
fn test_parse_uris() {
    let uris = parse_uris("sip:a@example.com, <sip:b@example.com;lr>, sip:c@example.com").unwrap();
    assert_eq!(uris.len(), 3);
    assert!(parse_uris("").unwrap().is_empty());
    assert!(parse_uris("not a uri").is_err());
}
