//! Parser for the identify tool's verbose output.
//!
//! The output is a tree printed with two-space indentation: `Key: Value`
//! lines are leaves, `Key:` lines open a subtree. The first line names the
//! input file and is ignored.

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;

fn geometry_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d+)x(\d+)\+(-?\d+)\+(-?\d+)").unwrap())
}

/// Parse verbose identify output into a nested JSON object.
///
/// Keys are lowercased. Values are normalised: `True`/`False` become
/// booleans, `Undefined` becomes null, numeric strings become numbers,
/// everything else stays verbatim. A `geometry` leaf additionally records
/// `width`, `height` and `aspect` in its subtree.
pub fn parse(output: &str) -> Value {
    let mut root = Value::Object(Map::new());
    let mut path: Vec<String> = Vec::new();

    for line in output.lines().skip(1) {
        let trimmed = line.trim_start();
        if trimmed.is_empty() {
            continue;
        }
        let indent = (line.len() - trimmed.len()) / 2;
        let depth = indent.max(1);
        path.truncate(depth - 1);

        let trimmed = trimmed.trim_end();
        if let Some(key) = trimmed.strip_suffix(':') {
            // Opens a subtree.
            let key = key.to_ascii_lowercase();
            if let Some(node) = subtree(&mut root, &path) {
                node.insert(key.clone(), Value::Object(Map::new()));
            }
            path.push(key);
            continue;
        }
        let Some((key, value)) = trimmed.split_once(": ") else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();
        let Some(node) = subtree(&mut root, &path) else {
            continue;
        };
        if key == "geometry" {
            if let Some(captures) = geometry_regex().captures(value) {
                let width: u64 = captures[1].parse().unwrap_or(0);
                let height: u64 = captures[2].parse().unwrap_or(0);
                node.insert("width".into(), Value::from(width));
                node.insert("height".into(), Value::from(height));
                if height > 0 {
                    node.insert("aspect".into(), Value::from(width as f64 / height as f64));
                }
            }
        }
        node.insert(key, normalize(value));
    }

    root
}

/// Depth-first search for the first subtree carrying both dimensions.
pub fn dimensions(tree: &Value) -> Option<(u64, u64, f64)> {
    let object = tree.as_object()?;
    if let (Some(width), Some(height)) = (
        object.get("width").and_then(Value::as_u64),
        object.get("height").and_then(Value::as_u64),
    ) {
        let aspect = object
            .get("aspect")
            .and_then(Value::as_f64)
            .unwrap_or(width as f64 / height.max(1) as f64);
        return Some((width, height, aspect));
    }
    object.values().find_map(dimensions)
}

/// Walk (and open where necessary) the subtree at `path`. A leaf key
/// reused as a subtree is replaced by an empty object.
fn subtree<'a>(root: &'a mut Value, path: &[String]) -> Option<&'a mut Map<String, Value>> {
    let mut node = root;
    for key in path {
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        let Value::Object(map) = node else {
            return None;
        };
        node = map
            .entry(key.clone())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    match node {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

fn normalize(value: &str) -> Value {
    match value {
        "True" | "true" => return Value::Bool(true),
        "False" | "false" => return Value::Bool(false),
        "Undefined" | "undefined" => return Value::Null,
        _ => {}
    }
    if let Ok(int) = value.parse::<i64>() {
        return Value::from(int);
    }
    if let Ok(float) = value.parse::<f64>() {
        if float.is_finite() {
            return Value::from(float);
        }
    }
    Value::from(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
Image: photo.png
  Format: PNG (Portable Network Graphics)
  Geometry: 1920x1080+0+0
  Units: Undefined
  Colorspace: sRGB
  Matte: False
  Channel depth:
    Red: 8-bit
    Green: 8-bit
  Page geometry: 1920x1080+0+0
  Compression: Zip
  Quality: 92
";

    #[test]
    fn geometry_sets_dimensions_on_the_same_subtree() {
        let tree = parse(SAMPLE);
        assert_eq!(tree["width"], 1920);
        assert_eq!(tree["height"], 1080);
        let aspect = tree["aspect"].as_f64().unwrap();
        assert!((aspect - 1920.0 / 1080.0).abs() < 1e-9);
        assert_eq!(tree["geometry"], "1920x1080+0+0");
    }

    #[test]
    fn values_are_normalised() {
        let tree = parse(SAMPLE);
        assert_eq!(tree["units"], Value::Null);
        assert_eq!(tree["matte"], Value::Bool(false));
        assert_eq!(tree["quality"], 92);
        assert_eq!(tree["colorspace"], "sRGB");
    }

    #[test]
    fn subtrees_nest_by_indentation() {
        let tree = parse(SAMPLE);
        assert_eq!(tree["channel depth"]["red"], "8-bit");
        assert_eq!(tree["channel depth"]["green"], "8-bit");
        // Siblings after a subtree return to the parent level.
        assert_eq!(tree["compression"], "Zip");
    }

    #[test]
    fn dimensions_walks_nested_trees() {
        let tree = parse("Image: x\n  Wrapper:\n    Geometry: 640x480+0+0\n");
        let (width, height, aspect) = dimensions(&tree).unwrap();
        assert_eq!((width, height), (640, 480));
        assert!((aspect - 640.0 / 480.0).abs() < 1e-9);
        assert!(dimensions(&parse("Image: x\n  Format: PNG\n")).is_none());
    }
}
