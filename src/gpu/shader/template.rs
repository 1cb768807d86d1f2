//! Generation of shaders from templates.
//!
//! A template is WGSL source code extended with two constructs:
//! - replacement labels, `{{label}}`, which are substituted with strings;
//! - conditional blocks, `#if(FLAG) ... #elseif(FLAG) ... #else ... #endif`,
//!   which select code depending on which flags are set.
//!
//! Conditional blocks can not be nested.

use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};
use anyhow::{Context, Result, anyhow, bail};
use std::fmt;

/// A parsed shader template that can be resolved into WGSL source code.
#[derive(Clone, Debug)]
pub struct ShaderTemplate<'a> {
    segments: Vec<Segment<'a>>,
    flags: Vec<&'a str>,
    labels: Vec<&'a str>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Segment<'a> {
    Text(&'a str),
    Replacement(&'a str),
    Conditional(Vec<Branch<'a>>),
}

/// One branch of a conditional block. The `else` branch has no condition.
#[derive(Clone, Debug, PartialEq, Eq)]
struct Branch<'a> {
    condition: Option<&'a str>,
    body: Vec<Segment<'a>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Token {
    ReplacementOpen,
    ReplacementClose,
    If,
    ElseIf,
    Else,
    EndIf,
}

/// Branches of the conditional block currently being parsed.
struct OpenConditional<'a> {
    branches: Vec<Branch<'a>>,
    has_else: bool,
}

impl Token {
    const ALL: [Self; 6] = [
        Self::ReplacementOpen,
        Self::ReplacementClose,
        Self::If,
        Self::ElseIf,
        Self::Else,
        Self::EndIf,
    ];

    const fn string(self) -> &'static str {
        match self {
            Self::ReplacementOpen => "{{",
            Self::ReplacementClose => "}}",
            Self::If => "#if",
            Self::ElseIf => "#elseif",
            Self::Else => "#else",
            Self::EndIf => "#endif",
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.string())
    }
}

impl<'a> ShaderTemplate<'a> {
    /// Parses the given template source code.
    ///
    /// # Errors
    /// Returns an error if the template has invalid syntax.
    pub fn new(source_code: &'a str) -> Result<Self> {
        let segments = parse_segments(source_code)?;

        let mut flags = Vec::new();
        let mut labels = Vec::new();
        collect_flags_and_labels(&segments, &mut flags, &mut labels);

        Ok(Self {
            segments,
            flags,
            labels,
        })
    }

    /// Returns the flags used in the template's conditional blocks.
    pub fn flags(&self) -> &[&'a str] {
        &self.flags
    }

    pub fn replacement_label_count(&self) -> usize {
        self.labels.len()
    }

    pub fn contains_replacement_label(&self, label: &str) -> bool {
        self.labels.contains(&label)
    }

    /// Resolves the template with the given flags set and with the given
    /// replacements. Each replacement specifies a label in the template and
    /// the string to replace each occurrence of the label with. Replacements
    /// for labels that only occur in excluded branches are not needed.
    ///
    /// # Errors
    /// Returns an error if:
    /// - A flag in `flags_to_set` does not exist in the template.
    /// - A label remaining after resolving the conditional blocks has no
    ///   replacement.
    /// - The same label occurs multiple times in `replacements`.
    pub fn resolve(
        &self,
        flags_to_set: &[&str],
        replacements: &[(&str, String)],
    ) -> Result<String> {
        for flag in flags_to_set {
            if !self.flags.contains(flag) {
                bail!(
                    "Flag `{flag}` is not present in the template (present flags: {:?})",
                    &self.flags
                );
            }
        }

        for (idx, (label, _)) in replacements.iter().enumerate() {
            if replacements[idx + 1..].iter().any(|(other, _)| other == label) {
                bail!("Duplicate label `{label}` in replacements");
            }
        }

        let mut resolved = String::new();
        resolve_segments(&self.segments, flags_to_set, replacements, &mut resolved)?;
        Ok(resolved)
    }
}

fn parse_segments(source_code: &str) -> Result<Vec<Segment<'_>>> {
    let patterns = Token::ALL.map(Token::string);
    let ac: AhoCorasick = AhoCorasickBuilder::new()
        .match_kind(MatchKind::LeftmostLongest)
        .build(patterns)
        .context("Could not build template tokenizer")?;

    let mut segments = Vec::new();
    let mut open_conditional: Option<OpenConditional<'_>> = None;
    let mut open_replacement: Option<usize> = None;
    let mut cursor = 0;

    for m in ac.find_iter(source_code) {
        if m.start() < cursor {
            continue;
        }
        let token = Token::ALL[m.pattern().as_usize()];

        if let Some(label_start) = open_replacement {
            if token != Token::ReplacementClose {
                bail!("Unexpected `{token}` inside replacement pattern");
            }
            let label = &source_code[label_start..m.start()];
            if !is_valid_identifier(label) {
                bail!(
                    "Invalid label in template (only alphanumeric characters and underscores are allowed): {label}"
                );
            }
            push_segment(&mut segments, &mut open_conditional, Segment::Replacement(label));
            open_replacement = None;
            cursor = m.end();
            continue;
        }

        let preceding_text = &source_code[cursor..m.start()];
        if !preceding_text.is_empty() {
            push_segment(&mut segments, &mut open_conditional, Segment::Text(preceding_text));
        }
        cursor = m.end();

        match token {
            Token::ReplacementOpen => {
                open_replacement = Some(m.end());
            }
            Token::ReplacementClose => {
                bail!("Unexpected closing brackets `{token}` outside of replacement pattern");
            }
            Token::If => {
                if open_conditional.is_some() {
                    bail!("Unexpected `{token}` inside a `{}` block", Token::If);
                }
                let (flag, end) = parse_condition(source_code, cursor, token)?;
                cursor = end;
                open_conditional = Some(OpenConditional {
                    branches: vec![Branch {
                        condition: Some(flag),
                        body: Vec::new(),
                    }],
                    has_else: false,
                });
            }
            Token::ElseIf => {
                let Some(conditional) = &mut open_conditional else {
                    bail!("Unexpected `{token}` outside a `{}` block", Token::If);
                };
                if conditional.has_else {
                    bail!("Unexpected `{token}` after `{}`", Token::Else);
                }
                let (flag, end) = parse_condition(source_code, cursor, token)?;
                cursor = end;
                conditional.branches.push(Branch {
                    condition: Some(flag),
                    body: Vec::new(),
                });
            }
            Token::Else => {
                let Some(conditional) = &mut open_conditional else {
                    bail!("Unexpected `{token}` outside a `{}` block", Token::If);
                };
                if conditional.has_else {
                    bail!("Unexpected `{token}` after another `{token}`");
                }
                conditional.has_else = true;
                conditional.branches.push(Branch {
                    condition: None,
                    body: Vec::new(),
                });
            }
            Token::EndIf => {
                let Some(conditional) = open_conditional.take() else {
                    bail!("Unexpected `{token}` outside a `{}` block", Token::If);
                };
                segments.push(Segment::Conditional(conditional.branches));
            }
        }
    }

    if open_replacement.is_some() {
        bail!(
            "Expected replacement pattern to have closing symbol `{}`",
            Token::ReplacementClose
        );
    }
    if open_conditional.is_some() {
        bail!("Expected `{}` block to have closing symbol `{}`", Token::If, Token::EndIf);
    }

    let remaining_text = &source_code[cursor..];
    if !remaining_text.is_empty() {
        segments.push(Segment::Text(remaining_text));
    }

    Ok(segments)
}

fn push_segment<'a>(
    segments: &mut Vec<Segment<'a>>,
    open_conditional: &mut Option<OpenConditional<'a>>,
    segment: Segment<'a>,
) {
    match open_conditional {
        Some(conditional) => {
            if let Some(branch) = conditional.branches.last_mut() {
                branch.body.push(segment);
            }
        }
        None => segments.push(segment),
    }
}

/// Parses the parenthesized flag following a conditional token starting at
/// byte `start`, and returns the flag along with the byte offset just past
/// the closing parenthesis.
fn parse_condition(source_code: &str, start: usize, token: Token) -> Result<(&str, usize)> {
    let following = &source_code[start..];

    let Some(open_idx) = following.find('(') else {
        bail!("Expected opening symbol `(` for condition following `{token}`");
    };
    if !following[..open_idx].trim().is_empty() {
        bail!("Expected only whitespace between `{token}` and opening symbol `(` for condition");
    }
    let Some(close_idx) = following[open_idx..].find(')').map(|idx| open_idx + idx) else {
        bail!("Expected closing symbol `)` after condition following `{token}`");
    };

    let flag = following[open_idx + 1..close_idx].trim();
    if !is_valid_identifier(flag) {
        bail!(
            "Invalid flag name (only alphanumeric characters and underscores are allowed): {flag}"
        );
    }

    Ok((flag, start + close_idx + 1))
}

fn collect_flags_and_labels<'a>(
    segments: &[Segment<'a>],
    flags: &mut Vec<&'a str>,
    labels: &mut Vec<&'a str>,
) {
    for segment in segments {
        match segment {
            Segment::Text(_) => {}
            Segment::Replacement(label) => {
                if !labels.contains(label) {
                    labels.push(label);
                }
            }
            Segment::Conditional(branches) => {
                for branch in branches {
                    if let Some(flag) = branch.condition {
                        if !flags.contains(&flag) {
                            flags.push(flag);
                        }
                    }
                    collect_flags_and_labels(&branch.body, flags, labels);
                }
            }
        }
    }
}

fn resolve_segments(
    segments: &[Segment<'_>],
    set_flags: &[&str],
    replacements: &[(&str, String)],
    resolved: &mut String,
) -> Result<()> {
    for segment in segments {
        match segment {
            Segment::Text(text) => resolved.push_str(text),
            Segment::Replacement(label) => {
                let replacement = replacements
                    .iter()
                    .find_map(|(other, replacement)| (other == label).then_some(replacement))
                    .ok_or_else(|| anyhow!("No replacement for label `{label}` in template"))?;
                resolved.push_str(replacement);
            }
            Segment::Conditional(branches) => {
                let selected = branches.iter().find(|branch| {
                    branch
                        .condition
                        .is_none_or(|flag| set_flags.contains(&flag))
                });
                if let Some(branch) = selected {
                    resolve_segments(&branch.body, set_flags, replacements, resolved)?;
                }
            }
        }
    }
    Ok(())
}

fn is_valid_identifier(identifier: &str) -> bool {
    !identifier.is_empty()
        && identifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Parses and validates the given WGSL source code with naga, returning the
/// validated module. Errors are rendered with the source location and
/// prefixed with the given label.
///
/// # Errors
/// Returns an error if parsing or validation fails.
pub fn parse_and_validate_wgsl(label: &str, source: &str) -> Result<naga::Module> {
    let module = naga::front::wgsl::parse_str(source).map_err(|error| {
        anyhow!(
            "Failed to parse shader `{label}`:\n{}",
            error.emit_to_string(source)
        )
    })?;

    let mut validator = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    );
    validator.validate(&module).map_err(|error| {
        anyhow!(
            "Failed to validate shader `{label}`:\n{}",
            error.emit_to_string(source)
        )
    })?;

    Ok(module)
}

/// Resolves the given template and checks that the result is valid WGSL.
/// Intended for tests.
///
/// # Panics
/// If resolution, parsing or validation fails.
pub fn validate_template(
    template: &ShaderTemplate<'_>,
    flags_to_set: &[&str],
    replacements: &[(&str, String)],
) {
    let source = template
        .resolve(flags_to_set, replacements)
        .expect("Resolving template failed");
    if let Err(error) = parse_and_validate_wgsl("template", &source) {
        println!("{source}\n");
        panic!("{error:#}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_find_no_flags_or_labels_for_empty_template() {
        let template = ShaderTemplate::new("").unwrap();
        assert!(template.flags().is_empty());
        assert_eq!(template.replacement_label_count(), 0);
    }

    #[test]
    fn should_find_flags_of_all_branches() {
        let template =
            ShaderTemplate::new("a #if (flag1) b #elseif(flag2) c #else d #endif e").unwrap();
        assert_eq!(template.flags(), &["flag1", "flag2"]);
    }

    #[test]
    fn should_find_each_label_once() {
        let template = ShaderTemplate::new("{ {{test}}test}_ {{test}} {{other}}").unwrap();
        assert_eq!(template.replacement_label_count(), 2);
        assert!(template.contains_replacement_label("test"));
        assert!(template.contains_replacement_label("other"));
    }

    #[test]
    fn should_find_labels_inside_conditional_blocks() {
        let template = ShaderTemplate::new("#if(flag) {{inner}} #endif").unwrap();
        assert!(template.contains_replacement_label("inner"));
    }

    #[test]
    fn should_return_error_for_invalid_conditional_blocks() {
        for source in [
            "#if (flag)",
            "#if (flag) endif",
            "if (flag) #endif",
            "(flag) #endif",
            "#if #endif",
            "#if (a) #if (b) #endif #endif",
            "#if (a) #else #elseif (b) #endif",
            "#if (a) #else #else #endif",
            "#else",
        ] {
            assert!(ShaderTemplate::new(source).is_err(), "{source}");
        }
    }

    #[test]
    fn should_return_error_for_invalid_flag_or_label_syntax() {
        for source in [
            "#if (fl-ag) #endif",
            "#if () #else #endif",
            "{{.label}}",
            "{{te-st}}",
            "{{test } }}",
            "{{test",
            "test}}",
        ] {
            assert!(ShaderTemplate::new(source).is_err(), "{source}");
        }
    }

    #[test]
    fn should_resolve_if_branch_when_flag_is_set() {
        let template = ShaderTemplate::new("a#if(flag)b#else c#endif d").unwrap();
        assert_eq!(template.resolve(&["flag"], &[]).unwrap(), "ab d");
        assert_eq!(template.resolve(&[], &[]).unwrap(), "a c d");
    }

    #[test]
    fn should_resolve_first_matching_branch() {
        let template = ShaderTemplate::new("#if(a)A#elseif(b)B#else C#endif").unwrap();
        assert_eq!(template.resolve(&["a", "b"], &[]).unwrap(), "A");
        assert_eq!(template.resolve(&["b"], &[]).unwrap(), "B");
        assert_eq!(template.resolve(&[], &[]).unwrap(), " C");
    }

    #[test]
    fn should_resolve_to_nothing_without_else_branch() {
        let template = ShaderTemplate::new("x#if(a)A#endif").unwrap();
        assert_eq!(template.resolve(&[], &[]).unwrap(), "x");
    }

    #[test]
    fn should_replace_every_occurrence_of_label() {
        let template = ShaderTemplate::new("let a = {{n}}; let b = {{n}} + {{m}};").unwrap();
        let resolved = template
            .resolve(&[], shader_template_replacements!("n" => 4, "m" => "1.0"))
            .unwrap();
        assert_eq!(resolved, "let a = 4; let b = 4 + 1.0;");
    }

    #[test]
    fn should_not_require_replacements_for_excluded_labels() {
        let template = ShaderTemplate::new("#if(a){{x}}#else y#endif").unwrap();
        assert_eq!(template.resolve(&[], &[]).unwrap(), " y");
        assert!(template.resolve(&["a"], &[]).is_err());
    }

    #[test]
    fn should_fail_to_resolve_with_unknown_flag_or_duplicate_label() {
        let template = ShaderTemplate::new("{{x}}").unwrap();
        assert!(template.resolve(&["flag"], &[("x", String::new())]).is_err());
        assert!(
            template
                .resolve(&[], &[("x", String::new()), ("x", String::new())])
                .is_err()
        );
    }

    #[test]
    fn parsing_invalid_wgsl_gives_labelled_error() {
        let error = parse_and_validate_wgsl("broken", "fn main( {").unwrap_err();
        assert!(error.to_string().contains("`broken`"));
    }

    #[test]
    fn resolved_template_validates_as_wgsl() {
        let template = ShaderTemplate::new(
            "@compute @workgroup_size({{size}}) fn main() { #if(extra) let x = 1; #endif }",
        )
        .unwrap();
        validate_template(&template, &["extra"], shader_template_replacements!("size" => 64));
    }
}
