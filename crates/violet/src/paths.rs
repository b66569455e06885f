//! Lexical path cleaning and joining for redirect and route path
//! composition. Collapses repeated slashes and resolves `.` and `..`
//! segments without touching the filesystem.

/// Lexically clean a slash-separated path. The result has no repeated
/// slashes, no `.` segments, and no `..` segments that can be resolved
/// against a parent. An empty result becomes `.`.
pub fn clean(path: &str) -> String {
	if path.is_empty() {
		return ".".to_string();
	}
	let rooted = path.starts_with('/');
	let mut out: Vec<&str> = Vec::new();
	for segment in path.split('/') {
		match segment {
			"" | "." => {},
			".." => match out.last() {
				Some(&"..") => out.push(".."),
				Some(_) => {
					out.pop();
				},
				None if !rooted => out.push(".."),
				// .. above the root is dropped
				None => {},
			},
			s => out.push(s),
		}
	}
	let mut cleaned = if rooted {
		String::from("/")
	} else {
		String::new()
	};
	cleaned.push_str(&out.join("/"));
	if cleaned.is_empty() {
		".".to_string()
	} else {
		cleaned
	}
}

/// Join two path elements and clean the result. Empty elements are
/// ignored; joining two empty elements yields an empty string, which the
/// callers map to `/`.
pub fn join(a: &str, b: &str) -> String {
	match (a.is_empty(), b.is_empty()) {
		(true, true) => String::new(),
		(true, false) => clean(b),
		(false, true) => clean(a),
		(false, false) => clean(&format!("{a}/{b}")),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn clean_resolves_dots() {
		assert_eq!(clean("/"), "/");
		assert_eq!(clean(""), ".");
		assert_eq!(clean("abc//def"), "abc/def");
		assert_eq!(clean("a/b/../c"), "a/c");
		assert_eq!(clean("/../a"), "/a");
		assert_eq!(clean("/a/b/./c/"), "/a/b/c");
		assert_eq!(clean("../../x"), "../../x");
	}

	#[test]
	fn join_ignores_empty_elements() {
		assert_eq!(join("", ""), "");
		assert_eq!(join("/", "x/"), "/x");
		assert_eq!(join("/hello", "world"), "/hello/world");
		assert_eq!(join("/", ""), "/");
		assert_eq!(join("", "/world"), "/world");
	}

	#[test]
	fn join_strips_trailing_slash() {
		assert_eq!(join("/", "/x/"), "/x");
	}
}
