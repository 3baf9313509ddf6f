use super::{
    command_failed, cpu_count, first_number, generic_result, parse_load_averages, CheckProfile,
    OsType,
};
use crate::config::CommandMap;
use crate::connector::{CommandChannel, CommandOutput};
use crate::result::{CheckResult, CheckStatus};
use serde_json::{json, Value};

/// Parsing rules for AIX hosts. Thresholds match the Linux profile; only the
/// raw formats differ.
pub struct AixProfile;

impl CheckProfile for AixProfile {
    fn os_type(&self) -> OsType {
        OsType::Aix
    }

    fn default_commands(&self) -> CommandMap {
        CommandMap::from_pairs([
            ("disk_usage", "df -g"),
            ("memory", "svmon -G"),
            ("cpu_load", "uptime"),
            ("services", "lssrc -a"),
            ("network", "ifconfig -a"),
            ("processes", "ps -ef | head -20"),
        ])
    }

    fn parse_result(
        &self,
        channel: &dyn CommandChannel,
        name: &str,
        output: &CommandOutput,
    ) -> CheckResult {
        match name {
            "disk_usage" => parse_disk_usage(output),
            "memory" => parse_memory(output),
            "cpu_load" => parse_cpu_load(channel, output),
            "services" => parse_services(output),
            "network" => parse_network(output),
            "processes" => parse_processes(output),
            _ => generic_result(name, output),
        }
    }
}

/// `df -g` table: FAIL when any filesystem is above 90% usage.
fn parse_disk_usage(output: &CommandOutput) -> CheckResult {
    if output.exit_code != 0 {
        return command_failed("disk_usage", "disk usage", output);
    }

    let lines: Vec<&str> = output.stdout.trim().lines().collect();
    if lines.len() < 2 {
        return CheckResult::new("disk_usage", CheckStatus::Fail, "Invalid disk usage output")
            .with_raw_output(output.stdout.clone());
    }

    let mut filesystems = Vec::new();
    let mut warning_count = 0;
    for line in &lines[1..] {
        if line.trim().is_empty() || line.starts_with("Filesystem") {
            continue;
        }
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 6 {
            continue;
        }
        let Ok(usage) = parts[4].trim_end_matches('%').parse::<u32>() else {
            continue;
        };
        let mount_point = if parts.len() > 6 { parts[6] } else { parts[5] };
        filesystems.push(json!({
            "filesystem": parts[0],
            "blocks": parts[1],
            "free": parts[2],
            "used": parts[3],
            "usage_percent": usage,
            "mount_point": mount_point,
        }));
        if usage > 90 {
            warning_count += 1;
        }
    }

    let status = if warning_count > 0 {
        CheckStatus::Fail
    } else {
        CheckStatus::Pass
    };
    CheckResult::new(
        "disk_usage",
        status,
        format!("Disk usage check completed. {warning_count} filesystem(s) above 90% usage"),
    )
    .with_details(json!({
        "filesystems": filesystems,
        "warning_count": warning_count,
    }))
    .with_raw_output(output.stdout.clone())
}

/// `svmon -G` page counts: WARN above 90% in use.
fn parse_memory(output: &CommandOutput) -> CheckResult {
    if output.exit_code != 0 {
        return command_failed("memory", "memory info", output);
    }

    let mut total_pages = None;
    let mut in_use_pages = None;
    let mut free_pages = None;
    for line in output.stdout.lines() {
        let lower = line.to_lowercase();
        if lower.contains("memory size") {
            total_pages = first_number(line);
        } else if lower.contains("memory") && !lower.contains("size") {
            if lower.contains("inuse") || lower.contains("in use") {
                in_use_pages = first_number(line);
            } else if lower.contains("free") {
                free_pages = first_number(line);
            }
        }
    }

    if total_pages.is_none() && in_use_pages.is_none() && free_pages.is_none() {
        return CheckResult::new(
            "memory",
            CheckStatus::Fail,
            "Failed to parse memory information",
        )
        .with_raw_output(output.stdout.clone());
    }

    let usage_percent = match (total_pages, in_use_pages) {
        (Some(total), Some(used)) if total > 0 => used * 100 / total,
        _ => 0,
    };
    let status = if usage_percent > 90 {
        CheckStatus::Warn
    } else {
        CheckStatus::Pass
    };

    let mut details = serde_json::Map::new();
    if let Some(total) = total_pages {
        details.insert("total_pages".to_string(), json!(total));
    }
    if let Some(used) = in_use_pages {
        details.insert("in_use_pages".to_string(), json!(used));
    }
    if let Some(free) = free_pages {
        details.insert("free_pages".to_string(), json!(free));
    }
    details.insert("usage_percent".to_string(), json!(usage_percent));

    CheckResult::new(
        "memory",
        status,
        format!("Memory usage: {usage_percent}%"),
    )
    .with_details(Value::Object(details))
    .with_raw_output(output.stdout.clone())
}

/// `uptime` load averages against the processor count from
/// `lsdev -c processor | wc -l` (defaulting to 1).
fn parse_cpu_load(channel: &dyn CommandChannel, output: &CommandOutput) -> CheckResult {
    if output.exit_code != 0 {
        return command_failed("cpu_load", "CPU load", output);
    }

    let Some((load_1, load_5, load_15)) = parse_load_averages(&output.stdout) else {
        return CheckResult::new(
            "cpu_load",
            CheckStatus::Fail,
            "Failed to parse CPU load information",
        )
        .with_raw_output(output.stdout.clone());
    };

    let cpus = cpu_count(channel, "lsdev -c processor | wc -l");
    let load_per_cpu = load_1 / f64::from(cpus);
    let status = if load_per_cpu > 2.0 {
        CheckStatus::Warn
    } else {
        CheckStatus::Pass
    };
    CheckResult::new(
        "cpu_load",
        status,
        format!("CPU load: {load_1:.2} (1min), {load_5:.2} (5min), {load_15:.2} (15min)"),
    )
    .with_details(json!({
        "load_1min": load_1,
        "load_5min": load_5,
        "load_15min": load_15,
        "cpu_count": cpus,
        "load_per_cpu": load_per_cpu,
    }))
    .with_raw_output(output.stdout.clone())
}

/// `lssrc -a` subsystems: FAIL when any is inoperative.
fn parse_services(output: &CommandOutput) -> CheckResult {
    if output.exit_code != 0 {
        return command_failed("services", "services status", output);
    }

    let mut services = Vec::new();
    let mut inactive_count = 0;
    for line in output.stdout.lines() {
        if line.trim().is_empty() || line.trim_start().starts_with("Subsystem") {
            continue;
        }
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 4 {
            continue;
        }
        let pid = if parts[2] != "-" && parts[2].chars().all(|c| c.is_ascii_digit()) {
            Some(parts[2])
        } else {
            None
        };
        let status = parts[3];
        services.push(json!({
            "subsystem": parts[0],
            "group": parts[1],
            "status": status,
            "pid": pid,
            "description": parts[4..].join(" "),
        }));
        if matches!(status.to_lowercase().as_str(), "inoperative" | "inactive") {
            inactive_count += 1;
        }
    }

    let status = if inactive_count > 0 {
        CheckStatus::Fail
    } else {
        CheckStatus::Pass
    };
    CheckResult::new(
        "services",
        status,
        format!("Found {} service(s), {inactive_count} inactive", services.len()),
    )
    .with_details(json!({"services": services, "inactive_count": inactive_count}))
    .with_raw_output(output.stdout.clone())
}

/// `ifconfig -a` interfaces: PASS while at least one carries the UP flag.
fn parse_network(output: &CommandOutput) -> CheckResult {
    if output.exit_code != 0 {
        return command_failed("network", "network info", output);
    }

    let mut interfaces: Vec<Value> = Vec::new();
    let mut current: Option<Interface> = None;
    for raw_line in output.stdout.lines() {
        let line = raw_line.trim();
        if let Some(iface) = parse_interface_line(line) {
            if let Some(done) = current.take() {
                interfaces.push(done.into_json());
            }
            current = Some(iface);
        } else if let Some(iface) = current.as_mut() {
            if let Some(addr) = parse_address(line) {
                iface.addresses.push(addr);
            }
        }
    }
    if let Some(done) = current.take() {
        interfaces.push(done.into_json());
    }

    let up_count = interfaces
        .iter()
        .filter(|iface| {
            iface["flags"]
                .as_array()
                .map(|flags| flags.iter().any(|f| f == "UP"))
                .unwrap_or(false)
        })
        .count();
    let status = if up_count > 0 {
        CheckStatus::Pass
    } else {
        CheckStatus::Fail
    };
    CheckResult::new(
        "network",
        status,
        format!("Found {} interface(s), {up_count} up", interfaces.len()),
    )
    .with_details(json!({"interfaces": interfaces, "up_count": up_count}))
    .with_raw_output(output.stdout.clone())
}

struct Interface {
    name: String,
    flags: Vec<String>,
    addresses: Vec<String>,
}

impl Interface {
    fn into_json(self) -> Value {
        json!({
            "name": self.name,
            "flags": self.flags,
            "addresses": self.addresses,
        })
    }
}

/// `en0: flags=1e080863,480<UP,BROADCAST,...>`
fn parse_interface_line(line: &str) -> Option<Interface> {
    let first = line.split_whitespace().next()?;
    let name = first.strip_suffix(':')?;
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }

    let flags = match line.find("flags=") {
        Some(idx) => {
            let rest = &line[idx + "flags=".len()..];
            match (rest.find('<'), rest.find('>')) {
                (Some(open), Some(close)) if close > open => rest[open + 1..close]
                    .split(',')
                    .map(str::to_string)
                    .collect(),
                _ => vec![rest.split_whitespace().next().unwrap_or_default().to_string()],
            }
        }
        None => Vec::new(),
    };

    Some(Interface {
        name: name.to_string(),
        flags,
        addresses: Vec::new(),
    })
}

fn parse_address(line: &str) -> Option<String> {
    for prefix in ["inet ", "inet6 "] {
        if let Some(rest) = line.strip_prefix(prefix) {
            return rest.split_whitespace().next().map(str::to_string);
        }
    }
    None
}

/// `ps -ef` rows; visibility only, always PASS.
fn parse_processes(output: &CommandOutput) -> CheckResult {
    if output.exit_code != 0 {
        return command_failed("processes", "process info", output);
    }

    let mut processes = Vec::new();
    for line in output.stdout.trim().lines().skip(1) {
        if line.trim().is_empty() {
            continue;
        }
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 8 {
            continue;
        }
        processes.push(json!({
            "user": parts[0],
            "pid": parts[1],
            "ppid": parts[2],
            "c": parts[3],
            "stime": parts[4],
            "tty": parts[5],
            "time": parts[6],
            "command": parts[7..].join(" "),
        }));
    }

    CheckResult::new(
        "processes",
        CheckStatus::Pass,
        format!("Showing top {} processes", processes.len()),
    )
    .with_details(json!({"processes": processes}))
    .with_raw_output(output.stdout.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::testing::MockChannel;

    fn ok(stdout: &str) -> CommandOutput {
        CommandOutput {
            stdout: stdout.to_string(),
            stderr: String::new(),
            exit_code: 0,
        }
    }

    #[test]
    fn disk_usage_flags_filesystems_above_ninety_percent() {
        let stdout = "\
Filesystem    GB blocks  Free  Used  %Used  Mounted on
/dev/hd4      0.50       0.02  0.48  95%    /
/dev/hd2      4.00       2.50  1.50  38%    /usr
";
        let result = parse_disk_usage(&ok(stdout));
        assert_eq!(result.status, CheckStatus::Fail);
        assert_eq!(result.details["warning_count"], 1);
        assert_eq!(result.details["filesystems"][0]["mount_point"], "/");
        assert_eq!(result.details["filesystems"][1]["usage_percent"], 38);
    }

    #[test]
    fn disk_usage_short_output_is_invalid() {
        let result = parse_disk_usage(&ok("garbage"));
        assert_eq!(result.status, CheckStatus::Fail);
        assert_eq!(result.message, "Invalid disk usage output");
    }

    #[test]
    fn memory_usage_above_ninety_percent_warns() {
        let stdout = "\
Memory size: 4194304
Memory inuse: 3984588
Memory free: 209716
";
        let result = parse_memory(&ok(stdout));
        assert_eq!(result.status, CheckStatus::Warn);
        assert_eq!(result.details["total_pages"], 4194304_u64);
        assert_eq!(result.details["in_use_pages"], 3984588_u64);
        assert_eq!(result.details["usage_percent"], 95);
    }

    #[test]
    fn memory_usage_below_threshold_passes() {
        let stdout = "\
Memory size: 4194304
Memory inuse: 2097152
Memory free: 2097152
";
        let result = parse_memory(&ok(stdout));
        assert_eq!(result.status, CheckStatus::Pass);
        assert_eq!(result.details["usage_percent"], 50);
    }

    #[test]
    fn memory_without_recognizable_lines_fails() {
        let result = parse_memory(&ok("nothing to see"));
        assert_eq!(result.status, CheckStatus::Fail);
    }

    #[test]
    fn cpu_load_uses_processor_count_lookup() {
        let channel = MockChannel::new();
        channel.respond("lsdev -c processor | wc -l", "8\n", "", 0);
        let uptime = ok("  04:11PM   up 12 days,  21:15,  2 users,  load average: 1.24, 1.34, 1.32");

        let result = parse_cpu_load(&channel, &uptime);
        assert_eq!(result.status, CheckStatus::Pass);
        assert_eq!(result.details["cpu_count"], 8);
        assert_eq!(result.details["load_1min"], 1.24);
    }

    #[test]
    fn services_with_inoperative_subsystem_fail() {
        let stdout = "\
Subsystem         Group            PID          Status
 sendmail         mail             123456       active
 ctcas            rsct             -            inoperative
";
        let result = parse_services(&ok(stdout));
        assert_eq!(result.status, CheckStatus::Fail);
        assert_eq!(result.details["inactive_count"], 1);
        assert_eq!(result.details["services"][0]["pid"], "123456");
        assert_eq!(result.details["services"][1]["pid"], Value::Null);
    }

    #[test]
    fn services_all_active_pass() {
        let stdout = "\
Subsystem         Group            PID          Status
 sendmail         mail             123456       active
 syslogd          ras              131074       active
";
        let result = parse_services(&ok(stdout));
        assert_eq!(result.status, CheckStatus::Pass);
        assert_eq!(result.message, "Found 2 service(s), 0 inactive");
    }

    const IFCONFIG_OUTPUT: &str = "\
en0: flags=1e080863,480<UP,BROADCAST,NOTRAILERS,RUNNING,SIMPLEX,MULTICAST,GROUPRT,64BIT>
        inet 10.1.2.3 netmask 0xffffff00 broadcast 10.1.2.255
lo0: flags=e08084b,c0<UP,BROADCAST,LOOPBACK,RUNNING,SIMPLEX,MULTICAST,GROUPRT,64BIT>
        inet 127.0.0.1 netmask 0xff000000 broadcast 127.255.255.255
        inet6 ::1%1/128
";

    #[test]
    fn network_with_up_interface_passes() {
        let result = parse_network(&ok(IFCONFIG_OUTPUT));
        assert_eq!(result.status, CheckStatus::Pass);
        assert_eq!(result.details["up_count"], 2);
        assert_eq!(result.details["interfaces"][0]["name"], "en0");
        assert_eq!(result.details["interfaces"][0]["addresses"][0], "10.1.2.3");
        assert_eq!(result.details["interfaces"][1]["addresses"][1], "::1%1/128");
    }

    #[test]
    fn network_with_no_up_interface_fails() {
        let stdout = "\
en0: flags=1e080862<BROADCAST,NOTRAILERS,RUNNING,SIMPLEX,MULTICAST>
        inet 10.1.2.3 netmask 0xffffff00 broadcast 10.1.2.255
";
        let result = parse_network(&ok(stdout));
        assert_eq!(result.status, CheckStatus::Fail);
        assert_eq!(result.details["up_count"], 0);
    }

    #[test]
    fn processes_always_pass_and_list_rows() {
        let stdout = "\
     UID     PID    PPID   C    STIME    TTY  TIME CMD
    root       1       0   0   Jun15      -  4:20 /etc/init
    root  131074       1   0   Jun15      -  0:00 /usr/sbin/syslogd -m 0
";
        let result = parse_processes(&ok(stdout));
        assert_eq!(result.status, CheckStatus::Pass);
        assert_eq!(result.message, "Showing top 2 processes");
        assert_eq!(
            result.details["processes"][1]["command"],
            "/usr/sbin/syslogd -m 0"
        );
    }

    #[test]
    fn dispatch_covers_unknown_checks() {
        let channel = MockChannel::new();
        let profile = AixProfile;
        let output = CommandOutput {
            stdout: String::new(),
            stderr: "unknown".to_string(),
            exit_code: 3,
        };
        let result = profile.parse_result(&channel, "errpt", &output);
        assert_eq!(result.status, CheckStatus::Fail);
        assert_eq!(result.details["exit_code"], 3);
    }
}
