use crate::error::IndexError;

/// Placeholder names recognised in command templates.
const PLACEHOLDERS: &[&str] = &[
    "input",
    "output",
    "format",
    "framerate",
    "interval",
    "time",
    "language",
    "file",
    "thumbnail",
    "geometry",
];

/// A configured command line with `$name` placeholders.
///
/// Templates are split on whitespace once at parse time; substitution is
/// purely textual inside each token, so a value containing spaces stays a
/// single argument. The first token is the binary.
#[derive(Debug, Clone)]
pub struct CommandTemplate {
    bin: String,
    args: Vec<String>,
}

impl CommandTemplate {
    pub fn parse(template: &str) -> Result<Self, IndexError> {
        let mut tokens = template.split_whitespace().map(str::to_string);
        let bin = tokens
            .next()
            .ok_or_else(|| IndexError::Fatal(format!("empty command template: {template:?}")))?;
        let args: Vec<String> = tokens.collect();
        for arg in &args {
            if let Some(name) = unknown_placeholder(arg) {
                return Err(IndexError::Fatal(format!(
                    "unknown placeholder ${name} in command template {template:?}"
                )));
            }
        }
        Ok(CommandTemplate { bin, args })
    }

    pub fn bin(&self) -> &str {
        &self.bin
    }

    /// Substitute `vars` into the argument vector. Unreferenced vars are
    /// fine; placeholders without a matching var are left verbatim.
    pub fn render(&self, vars: &[(&str, String)]) -> (String, Vec<String>) {
        let args = self
            .args
            .iter()
            .map(|arg| {
                let mut token = arg.clone();
                // Longest name first so $format never clips $framerate.
                let mut ordered: Vec<&(&str, String)> = vars.iter().collect();
                ordered.sort_by_key(|(name, _)| std::cmp::Reverse(name.len()));
                for (name, value) in ordered {
                    if token.contains('$') {
                        token = token.replace(&format!("${name}"), value);
                    }
                }
                token
            })
            .collect();
        (self.bin.clone(), args)
    }
}

fn unknown_placeholder(token: &str) -> Option<String> {
    let mut rest = token;
    while let Some(pos) = rest.find('$') {
        let name: String = rest[pos + 1..]
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric())
            .collect();
        if !name.is_empty() && !PLACEHOLDERS.contains(&name.as_str()) {
            return Some(name);
        }
        rest = &rest[pos + 1..];
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_placeholders_textually() {
        let template =
            CommandTemplate::parse("ffmpeg -y -ss $time -i $input -vf scale=$geometry $thumbnail")
                .unwrap();
        let (bin, args) = template.render(&[
            ("time", "0042".to_string()),
            ("input", "/save/ab/cd.mp4".to_string()),
            ("geometry", "320:-1".to_string()),
            ("thumbnail", "/save/ab/cdp.png".to_string()),
        ]);
        assert_eq!(bin, "ffmpeg");
        assert_eq!(
            args,
            vec![
                "-y",
                "-ss",
                "0042",
                "-i",
                "/save/ab/cd.mp4",
                "-vf",
                "scale=320:-1",
                "/save/ab/cdp.png"
            ]
        );
    }

    #[test]
    fn format_does_not_clip_framerate() {
        let template = CommandTemplate::parse("ffmpeg -r $framerate -f $format $output").unwrap();
        let (_, args) = template.render(&[
            ("format", "mp4".to_string()),
            ("framerate", "30".to_string()),
            ("output", "out.mp4".to_string()),
        ]);
        assert_eq!(args, vec!["-r", "30", "-f", "mp4", "out.mp4"]);
    }

    #[test]
    fn rejects_unknown_placeholders() {
        assert!(CommandTemplate::parse("ffmpeg $bogus").is_err());
        assert!(CommandTemplate::parse("").is_err());
    }
}
