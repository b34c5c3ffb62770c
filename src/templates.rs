//! Server configuration from templates, and the directory tree servers expect to find.
//!
//! Servers are configured to keep all of their files under the mount directory, so that the
//! checkpoints capture their filesystem state too.

use failure::ResultExt;

use crate::shell::Execute;

/// Placeholder for the mount directory.
pub const SLS_MOUNT: &str = "SLS_MOUNT";
/// Placeholder for the address the server listens on.
pub const SLS_SERVER_URL: &str = "SLS_SERVER_URL";
/// Placeholder for the port the server listens on.
pub const SLS_SERVER_PORT: &str = "SLS_SERVER_PORT";

/// Values substituted into a configuration template.
#[derive(Clone, Debug)]
pub struct TemplateVars<'a> {
    pub mountdir: &'a str,
    pub addr: &'a str,
    pub port: u16,
}

impl TemplateVars<'_> {
    /// Replace every placeholder in `template`.
    pub fn render(&self, template: &str) -> String {
        template
            .lines()
            .map(|line| {
                line.replace(SLS_MOUNT, self.mountdir)
                    .replace(SLS_SERVER_URL, self.addr)
                    .replace(SLS_SERVER_PORT, &self.port.to_string())
            })
            .fold(String::with_capacity(template.len()), |mut out, line| {
                out.push_str(&line);
                out.push('\n');
                out
            })
    }
}

/// Render the template at `input` into `output`.
pub fn generate_conf(
    shell: &impl Execute,
    vars: &TemplateVars<'_>,
    input: &str,
    output: &str,
) -> Result<(), failure::Error> {
    let template = std::fs::read_to_string(input)
        .with_context(|_| format!("reading configuration template {}", input))?;
    shell.write_file(output, &vars.render(&template))
}

/// The directories (relative to the mount directory) a server called `name` uses.
pub fn slsdirs(name: &str) -> Vec<String> {
    vec![
        "data".into(),
        "log".into(),
        dir!("log", name),
        "logs".into(),
        "tmp".into(),
        "var".into(),
        "var/cache".into(),
        dir!("var/cache", name),
        "var/run".into(),
        dir!("var/run", name),
        name.into(),
    ]
}

/// Create the directories of `slsdirs` under `mountdir`. Existing directories are fine.
pub fn make_slsdirs(
    shell: &impl Execute,
    mountdir: &str,
    name: &str,
) -> Result<(), failure::Error> {
    for folder in slsdirs(name) {
        shell.create_dir(&dir!(mountdir, folder))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::testing::FakeShell;

    #[test]
    fn placeholders_are_replaced_everywhere() {
        let vars = TemplateVars {
            mountdir: "/testmnt",
            addr: "10.0.0.1",
            port: 8080,
        };

        let rendered = vars.render(
            "server.document-root = \"SLS_MOUNT/www\"\n\
             server.bind = \"SLS_SERVER_URL\"\n\
             server.port = SLS_SERVER_PORT\n\
             server.errorlog = \"SLS_MOUNT/log/SLS_MOUNT.log\"\n",
        );

        assert_eq!(
            rendered,
            "server.document-root = \"/testmnt/www\"\n\
             server.bind = \"10.0.0.1\"\n\
             server.port = 8080\n\
             server.errorlog = \"/testmnt/log//testmnt.log\"\n"
        );
    }

    #[test]
    fn generate_conf_writes_the_rendered_file() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("redis.conf");
        std::fs::write(&input, "dir SLS_MOUNT\nport SLS_SERVER_PORT\n").unwrap();

        let shell = FakeShell::new();
        let vars = TemplateVars {
            mountdir: "/m",
            addr: "localhost",
            port: 6379,
        };
        generate_conf(&shell, &vars, input.to_str().unwrap(), "/m/redis.conf").unwrap();
        assert_eq!(shell.file("/m/redis.conf").unwrap(), "dir /m\nport 6379\n");

        assert!(generate_conf(&shell, &vars, "/nonexistent/template", "/m/x.conf").is_err());
        assert_eq!(shell.file("/m/x.conf"), None);
    }

    #[test]
    fn server_directory_tree() {
        let shell = FakeShell::new();
        make_slsdirs(&shell, "/testmnt", "nginx").unwrap();

        let commands = shell.commands();
        assert_eq!(commands.len(), 11);
        assert_eq!(commands[0], "mkdir /testmnt/data");
        assert_eq!(commands[2], "mkdir /testmnt/log/nginx");
        assert_eq!(commands[9], "mkdir /testmnt/var/run/nginx");
        assert_eq!(commands[10], "mkdir /testmnt/nginx");
    }
}
