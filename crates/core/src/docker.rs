//! Docker command lines
//!
//! Builders for the `docker` invocations the installer issues. They only
//! produce command lines; execution goes through a
//! [`CommandRunner`](crate::command::CommandRunner). Paths and names are
//! shell-quoted; build arguments are already rendered by
//! [`render_build_args`](crate::env_file::render_build_args).

use std::path::Path;

fn quote(value: &str) -> String {
    shell_words::quote(value).into_owned()
}

/// `docker build -t <image> [<build args>] <context>`
pub fn build_image(image: &str, build_args: &str, context: &Path) -> String {
    let mut command = format!("docker build -t {}", quote(image));
    if !build_args.trim().is_empty() {
        command.push(' ');
        command.push_str(build_args.trim());
    }
    command.push(' ');
    command.push_str(&quote(&context.to_string_lossy()));
    command
}

/// Force-remove a container; exits non-zero when it does not exist
pub fn remove_container(container: &str) -> String {
    format!("docker rm -f {}", quote(container))
}

/// Container started by the single-container strategies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSpec<'a> {
    pub container: &'a str,
    pub image: &'a str,
    pub network: &'a str,
    /// Published 1:1 as `<port>:<port>`
    pub port: u16,
}

impl RunSpec<'_> {
    /// `docker run -d --name <container> --network <network> -p <port>:<port> <image>`
    pub fn command(&self) -> String {
        format!(
            "docker run -d --name {} --network {} -p {}:{} {}",
            quote(self.container),
            quote(self.network),
            self.port,
            self.port,
            quote(self.image)
        )
    }
}

/// Stop whatever containers currently publish `port`
pub fn stop_port_publishers(port: u16) -> String {
    format!(
        "docker ps -q --filter \"publish={}\" | xargs -r docker stop",
        port
    )
}

/// Tag of the image built from a repository subdirectory
pub fn subdirectory_image(image: &str, dir: &str) -> String {
    format!("{}-{}", image, dir)
}
