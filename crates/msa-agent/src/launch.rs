use crate::config::AgentConfig;

/// G1 tuning set the servers have always been launched with. Kept verbatim.
pub const TUNING_FLAGS: &[&str] = &[
    "-XX:+UseG1GC",
    "-XX:+ParallelRefProcEnabled",
    "-XX:MaxGCPauseMillis=200",
    "-XX:+UnlockExperimentalVMOptions",
    "-XX:+DisableExplicitGC",
    "-XX:+AlwaysPreTouch",
    "-XX:G1NewSizePercent=30",
    "-XX:G1MaxNewSizePercent=40",
    "-XX:G1HeapRegionSize=8M",
    "-XX:G1ReservePercent=20",
    "-XX:G1HeapWastePercent=5",
    "-XX:G1MixedGCCountTarget=4",
    "-XX:InitiatingHeapOccupancyPercent=15",
    "-XX:G1MixedGCLiveThresholdPercent=90",
    "-XX:G1RSetUpdatingPauseTimePercent=5",
    "-XX:SurvivorRatio=32",
    "-XX:+PerfDisableSharedMem",
    "-XX:MaxTenuringThreshold=1",
    "-Dusing.aikars.flags=https://mcflags.emc.gs",
    "-Daikars.new.flags=true",
];

pub const MIN_PORT: u16 = 25000;
pub const MAX_PORT: u16 = 30000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub exec: String,
    pub args: Vec<String>,
}

impl LaunchSpec {
    pub fn command_line(&self) -> String {
        let mut out = self.exec.clone();
        for a in &self.args {
            out.push(' ');
            out.push_str(a);
        }
        out
    }
}

pub fn resolve_launch_spec(
    config: &AgentConfig,
    ram_gb: u32,
    port: u16,
    world_name: Option<&str>,
) -> LaunchSpec {
    let mut args: Vec<String> = TUNING_FLAGS.iter().map(|s| s.to_string()).collect();
    args.push(format!("-Xms{ram_gb}G"));
    args.push(format!("-Xmx{ram_gb}G"));
    args.push("-jar".to_string());
    args.push(config.server_jar.clone());
    args.push("--port".to_string());
    args.push(port.to_string());
    args.push("--nogui".to_string());

    if let Some(world) = world_name.filter(|w| !w.is_empty()) {
        args.push("--world".to_string());
        args.push(world.to_string());
    }

    LaunchSpec {
        exec: config.java_bin.clone(),
        args,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heap_and_server_flags_follow_tuning_set() {
        let cfg = AgentConfig::with_server_root("/tmp/server");
        let spec = resolve_launch_spec(&cfg, 2, 25005, None);
        assert_eq!(spec.exec, "java");
        assert_eq!(&spec.args[..TUNING_FLAGS.len()], TUNING_FLAGS);
        assert_eq!(
            &spec.args[TUNING_FLAGS.len()..],
            &[
                "-Xms2G",
                "-Xmx2G",
                "-jar",
                "../../jar/server-1.19.2.jar",
                "--port",
                "25005",
                "--nogui",
            ]
        );
    }

    #[test]
    fn world_is_appended_only_when_named() {
        let cfg = AgentConfig::with_server_root("/tmp/server");
        let spec = resolve_launch_spec(&cfg, 4, 25010, Some("survival"));
        let tail: Vec<&str> = spec.args.iter().rev().take(2).map(String::as_str).collect();
        assert_eq!(tail, vec!["survival", "--world"]);

        let blank = resolve_launch_spec(&cfg, 4, 25010, Some(""));
        assert!(!blank.args.iter().any(|a| a == "--world"));

        let spaced = resolve_launch_spec(&cfg, 4, 25010, Some(" my world "));
        assert_eq!(spaced.args.last().map(String::as_str), Some(" my world "));
    }

    #[test]
    fn command_line_is_space_joined() {
        let spec = LaunchSpec {
            exec: "java".to_string(),
            args: vec!["-jar".to_string(), "x.jar".to_string()],
        };
        assert_eq!(spec.command_line(), "java -jar x.jar");
    }
}
