use url::Url;

/// Host and path of a page URL with numeric path segments replaced by `*`.
///
/// Used to key correction mappings so that `/orders/42` and `/orders/43`
/// share what was learned. Unparsable input is returned trimmed.
pub fn page_url_pattern(page_url: &str) -> String {
    let Ok(url) = Url::parse(page_url.trim()) else {
        return page_url.trim().to_string();
    };
    let host = url.host_str().unwrap_or_default();
    let port = url.port().map(|p| format!(":{}", p)).unwrap_or_default();
    let path: Vec<&str> = url
        .path()
        .split('/')
        .map(|segment| {
            if !segment.is_empty() && segment.chars().all(|c| c.is_ascii_digit()) {
                "*"
            } else {
                segment
            }
        })
        .collect();
    format!("{}{}{}", host, port, path.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_scheme_and_query() {
        assert_eq!(
            page_url_pattern("https://shop.example.com/cart?ref=nav#top"),
            "shop.example.com/cart"
        );
    }

    #[test]
    fn test_numeric_segments_become_wildcards() {
        assert_eq!(
            page_url_pattern("http://localhost:3000/orders/42/items/7"),
            "localhost:3000/orders/*/items/*"
        );
    }

    #[test]
    fn test_unparsable_input_is_kept() {
        assert_eq!(page_url_pattern("  not a url "), "not a url");
        assert_eq!(page_url_pattern(""), "");
    }
}
