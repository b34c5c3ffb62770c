//! Small helper macros shared by the benchmark routines.

/// Join path components with `/`, e.g. `dir!(mountdir, "var", "run")`.
#[macro_export]
macro_rules! dir {
    ($first:expr $(, $part:expr)* $(,)?) => {{
        #[allow(unused_mut)]
        let mut path = ::std::string::String::from($first);
        $(
            if !path.ends_with('/') {
                path.push('/');
            }
            path.push_str(::std::string::ToString::to_string(&$part).trim_start_matches('/'));
        )*
        path
    }};
}

/// Build a `Cmd` from a program and a list of arguments. Any argument that implements `Display`
/// can be passed.
///
/// ```rust,ignore
/// shell.run(argv!("gstripe", "destroy", &cfg.stripename).allow_error())?;
/// ```
#[macro_export]
macro_rules! argv {
    ($prog:expr $(, $arg:expr)* $(,)?) => {{
        $crate::shell::Cmd::new($prog)
            $(.arg(::std::string::ToString::to_string(&$arg)))*
    }};
}

/// Time the given expression and push the duration with the given label into `$timers`.
#[macro_export]
macro_rules! time {
    ($timers:ident, $label:expr, $e:expr) => {{
        let start = ::std::time::Instant::now();
        let result = $e;
        let duration = ::std::time::Instant::now() - start;
        $timers.push(($label, duration));
        result
    }};
}

#[cfg(test)]
mod tests {
    #[test]
    fn dir_joins_components() {
        assert_eq!(dir!("/mnt", "var", "run"), "/mnt/var/run");
        assert_eq!(dir!("/mnt/", "/log"), "/mnt/log");
        assert_eq!(dir!("out", 3), "out/3");
        assert_eq!(dir!("only"), "only");
    }

    #[test]
    fn argv_builds_command_line() {
        let cmd = argv!("gstripe", "create", "-s", 65536, "st0");
        assert_eq!(cmd.to_string(), "gstripe create -s 65536 st0");
    }
}
