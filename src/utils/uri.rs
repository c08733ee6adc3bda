//! Relative URIs between output documents.

/// Relative URI from the document at `base` to `to`; both are `/`-separated
/// target URIs such as `guide/intro.html`. Fragments are ignored.
///
/// ```ignore
/// relative_uri("guide/intro.html", "api/index.html") // "../api/index.html"
/// relative_uri("guide/intro.html", "guide/")         // "./"
/// ```
pub fn relative_uri(base: &str, to: &str) -> String {
    if to.starts_with('/') {
        return to.to_owned();
    }

    let b: Vec<&str> = strip_fragment(base).split('/').collect();
    let t: Vec<&str> = strip_fragment(to).split('/').collect();

    // Common leading directories; the last segment is the page itself.
    let common = b[..b.len() - 1]
        .iter()
        .zip(&t[..t.len() - 1])
        .take_while(|(x, y)| x == y)
        .count();
    let (b, t) = (&b[common..], &t[common..]);

    if b == t {
        return String::new();
    }
    if b.len() == 1 && t == [""] {
        return "./".into();
    }
    "../".repeat(b.len() - 1) + &t.join("/")
}

fn strip_fragment(uri: &str) -> &str {
    uri.split_once('#').map_or(uri, |(path, _)| path)
}
