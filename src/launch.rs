use crate::config::SourceKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub source: Option<SourceKind>,
    pub query: Option<String>,
    pub page: u32,
    /// Image to open once the gallery page has loaded.
    pub photo_id: Option<String>,
}

impl LaunchRequest {
    pub fn browse() -> Self {
        Self {
            source: None,
            query: None,
            page: 1,
            photo_id: None,
        }
    }
}

pub fn parse_launch_request_from_args(args: &[String]) -> Result<Option<LaunchRequest>, String> {
    if args.is_empty() {
        return Ok(None);
    }

    if args.len() == 1 && is_snapview_uri(&args[0]) {
        return parse_snapview_uri(&args[0]).map(Some);
    }

    let mut request = LaunchRequest::browse();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--search" | "-s" => {
                let query = iter
                    .next()
                    .ok_or_else(|| "Missing query after --search.".to_string())?;
                request.query = non_blank(query);
            }
            "--source" => {
                let value = iter
                    .next()
                    .ok_or_else(|| "Missing source after --source.".to_string())?;
                request.source = Some(parse_source(value)?);
            }
            "--page" => {
                let value = iter
                    .next()
                    .ok_or_else(|| "Missing number after --page.".to_string())?;
                request.page = parse_page(value)?;
            }
            other if other.starts_with('-') => {
                return Err(format!("Unknown option {other}."));
            }
            other => {
                // Bare words are treated as a search query.
                let query = match request.query.take() {
                    Some(existing) => format!("{existing} {other}"),
                    None => other.to_string(),
                };
                request.query = non_blank(&query);
            }
        }
    }
    Ok(Some(request))
}

/// Parses `snapview://search?q=...`, `snapview://browse?page=N`,
/// `snapview://photo/<id>` and friends.
pub fn parse_snapview_uri(uri: &str) -> Result<LaunchRequest, String> {
    let rest = strip_snapview_scheme(uri)
        .ok_or_else(|| "URL must start with snapview://".to_string())?;

    let (location, query) = split_location_and_query(rest);
    let mut request = LaunchRequest::browse();

    let location = location.trim().trim_matches('/');
    let lower = location.to_ascii_lowercase();
    if let Some(path_query) = lower.strip_prefix("search/") {
        let original = &location[location.len() - path_query.len()..];
        request.query = non_blank(&percent_decode(original)?);
    } else if let Some(path_id) = lower
        .strip_prefix("photo/")
        .or_else(|| lower.strip_prefix("photos/"))
    {
        let original = &location[location.len() - path_id.len()..];
        request.photo_id = non_blank(&percent_decode(original)?);
        if request.photo_id.is_none() {
            return Err("Missing photo id in snapview URL.".to_string());
        }
    } else if !matches!(lower.as_str(), "" | "browse" | "search" | "open") {
        return Err(format!("Unsupported snapview location: {location}"));
    }

    if let Some(query_string) = query {
        for pair in query_string.split('&') {
            if pair.is_empty() {
                continue;
            }
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let key = key.trim().to_ascii_lowercase();
            let decoded_value = percent_decode(value)?;
            match key.as_str() {
                "q" | "query" | "search" => {
                    request.query = non_blank(&decoded_value);
                }
                "page" => {
                    if !decoded_value.trim().is_empty() {
                        request.page = parse_page(&decoded_value)?;
                    }
                }
                "source" => {
                    if !decoded_value.trim().is_empty() {
                        request.source = Some(parse_source(&decoded_value)?);
                    }
                }
                _ => {}
            }
        }
    }

    Ok(request)
}

fn non_blank(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn parse_page(value: &str) -> Result<u32, String> {
    match value.trim().parse::<u32>() {
        Ok(page) if page >= 1 => Ok(page),
        _ => Err("page must be a positive integer.".to_string()),
    }
}

fn parse_source(value: &str) -> Result<SourceKind, String> {
    SourceKind::parse(value)
        .ok_or_else(|| format!("Unknown source {value:?}; expected unsplash or backend."))
}

fn is_snapview_uri(value: &str) -> bool {
    strip_snapview_scheme(value).is_some()
}

fn strip_snapview_scheme(uri: &str) -> Option<&str> {
    let prefix = "snapview://";
    if uri.len() >= prefix.len() && uri[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&uri[prefix.len()..])
    } else {
        None
    }
}

fn split_location_and_query(value: &str) -> (&str, Option<&str>) {
    if let Some((location, query)) = value.split_once('?') {
        (location, Some(query))
    } else {
        (value, None)
    }
}

fn percent_decode(value: &str) -> Result<String, String> {
    let bytes = value.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut index = 0;
    while index < bytes.len() {
        match bytes[index] {
            b'+' => {
                decoded.push(b' ');
                index += 1;
            }
            b'%' => {
                if index + 2 >= bytes.len() {
                    return Err("Invalid percent-encoding in URL.".to_string());
                }
                let hi = decode_hex_digit(bytes[index + 1])
                    .ok_or_else(|| "Invalid percent-encoding in URL.".to_string())?;
                let lo = decode_hex_digit(bytes[index + 2])
                    .ok_or_else(|| "Invalid percent-encoding in URL.".to_string())?;
                decoded.push((hi << 4) | lo);
                index += 3;
            }
            byte => {
                decoded.push(byte);
                index += 1;
            }
        }
    }

    String::from_utf8(decoded).map_err(|_| "URL contains invalid UTF-8 after decoding.".to_string())
}

fn decode_hex_digit(value: u8) -> Option<u8> {
    match value {
        b'0'..=b'9' => Some(value - b'0'),
        b'a'..=b'f' => Some(value - b'a' + 10),
        b'A'..=b'F' => Some(value - b'A' + 10),
        _ => None,
    }
}
