//! Crate-local macros.

/// Evaluates the given expression and logs how long the evaluation took at
/// the info level.
macro_rules! with_timing_info_logging {
    ($message:expr $(,$arg:expr)*; $expression:expr) => {{
        let _start_time = ::std::time::Instant::now();
        let _result = $expression;
        let _duration = _start_time.elapsed();
        log::info!(
            concat!($message, " took {:.2} ms")$(,$arg)*,
            _duration.as_secs_f64() * 1e3,
        );
        _result
    }};
}

/// Evaluates the given expression with trace-level log messages marking the
/// beginning and end of the evaluation.
macro_rules! with_trace_logging {
    ($message:expr $(,$arg:expr)*; $expression:expr) => {{
        log::trace!(concat!("Begin: ", $message)$(,$arg)*);
        let _start_time = ::std::time::Instant::now();
        let _result = $expression;
        let _duration = _start_time.elapsed();
        log::trace!(
            concat!("({:.2} ms) Done: ", $message),
            _duration.as_secs_f64() * 1e3
            $(,$arg)*
        );
        _result
    }};
}

/// Builds the slice of `(label, replacement)` pairs expected by
/// [`ShaderTemplate::resolve`](crate::gpu::shader::template::ShaderTemplate::resolve).
macro_rules! shader_template_replacements {
    ($($label:literal => $replacement:expr),* $(,)?) => {
        &[$(($label, ($replacement).to_string())),*]
    };
}

/// Includes the source code of the WGSL template with the given name from the
/// `shaders` directory.
macro_rules! shader_template_source {
    ($kind:literal, $name:literal) => {
        include_str!(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/shaders/",
            $kind,
            "/",
            $name,
            ".template.wgsl"
        ))
    };
}
