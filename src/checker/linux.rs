use super::{
    command_failed, cpu_count, generic_result, parse_load_averages, CheckProfile, OsType,
};
use crate::config::CommandMap;
use crate::connector::{CommandChannel, CommandOutput};
use crate::result::{CheckResult, CheckStatus};
use serde_json::{json, Value};

/// Parsing rules for Linux hosts.
pub struct LinuxProfile;

impl CheckProfile for LinuxProfile {
    fn os_type(&self) -> OsType {
        OsType::Linux
    }

    fn default_commands(&self) -> CommandMap {
        CommandMap::from_pairs([
            ("disk_usage", "df -h"),
            ("memory", "free -m"),
            ("cpu_load", "uptime"),
            ("services", "systemctl list-units --type=service --state=failed"),
            ("network", "ip addr show"),
            ("processes", "ps aux | head -20"),
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

/// `df -h` table: FAIL when any filesystem is above 90% usage.
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
        if line.trim().is_empty() {
            continue;
        }
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 6 {
            continue;
        }
        let Ok(usage) = parts[4].trim_end_matches('%').parse::<u32>() else {
            continue;
        };
        filesystems.push(json!({
            "filesystem": parts[0],
            "size": parts[1],
            "used": parts[2],
            "available": parts[3],
            "usage_percent": usage,
            "mount_point": parts[5],
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

/// `free -m` summary: WARN above 90% used.
fn parse_memory(output: &CommandOutput) -> CheckResult {
    if output.exit_code != 0 {
        return command_failed("memory", "memory info", output);
    }

    let mut memory_info = None;
    for line in output.stdout.lines() {
        if !line.starts_with("Mem:") {
            continue;
        }
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 7 {
            continue;
        }
        let (Ok(total), Ok(used), Ok(free), Ok(available)) = (
            parts[1].parse::<u64>(),
            parts[2].parse::<u64>(),
            parts[3].parse::<u64>(),
            parts[6].parse::<u64>(),
        ) else {
            continue;
        };
        if total == 0 {
            continue;
        }
        memory_info = Some((total, used, free, available, used * 100 / total));
    }

    let Some((total, used, free, available, usage_percent)) = memory_info else {
        return CheckResult::new(
            "memory",
            CheckStatus::Fail,
            "Failed to parse memory information",
        )
        .with_raw_output(output.stdout.clone());
    };

    let status = if usage_percent > 90 {
        CheckStatus::Warn
    } else {
        CheckStatus::Pass
    };
    CheckResult::new(
        "memory",
        status,
        format!("Memory usage: {usage_percent}% ({used}MB used of {total}MB)"),
    )
    .with_details(json!({
        "total": total,
        "used": used,
        "free": free,
        "available": available,
        "usage_percent": usage_percent,
    }))
    .with_raw_output(output.stdout.clone())
}

/// `uptime` load averages against the cpu count (`nproc`, defaulting to 1):
/// WARN above 2.0 load per cpu.
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

    let cpus = cpu_count(channel, "nproc");
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

/// Failed systemd units: any row means FAIL.
fn parse_services(output: &CommandOutput) -> CheckResult {
    if output.exit_code != 0 {
        return command_failed("services", "services status", output);
    }

    let mut failed_services = Vec::new();
    for line in output.stdout.lines() {
        if !line.to_lowercase().contains("failed") || line.trim_start().starts_with("UNIT") {
            continue;
        }
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 4 {
            continue;
        }
        failed_services.push(json!({
            "unit": parts[0],
            "load": parts[1],
            "active": parts[2],
            "sub": parts[3],
            "description": parts[4..].join(" "),
        }));
    }

    let status = if failed_services.is_empty() {
        CheckStatus::Pass
    } else {
        CheckStatus::Fail
    };
    CheckResult::new(
        "services",
        status,
        format!("Found {} failed service(s)", failed_services.len()),
    )
    .with_details(json!({"failed_services": failed_services}))
    .with_raw_output(output.stdout.clone())
}

/// `ip addr show` interfaces: PASS while at least one carries the UP flag.
fn parse_network(output: &CommandOutput) -> CheckResult {
    if output.exit_code != 0 {
        return command_failed("network", "network info", output);
    }

    let mut interfaces: Vec<Value> = Vec::new();
    let mut current: Option<Interface> = None;
    for raw_line in output.stdout.lines() {
        let line = raw_line.trim();
        if is_interface_line(line) {
            if let Some(iface) = current.take() {
                interfaces.push(iface.into_json());
            }
            current = parse_interface_line(line);
        } else if let Some(iface) = current.as_mut() {
            if let Some(rest) = line.strip_prefix("inet ") {
                if let Some(addr) = rest.split_whitespace().next() {
                    iface.addresses.push(addr.to_string());
                }
            }
        }
    }
    if let Some(iface) = current.take() {
        interfaces.push(iface.into_json());
    }

    let up_count = interfaces
        .iter()
        .filter(|iface| {
            iface["flags"]
                .as_str()
                .map(|flags| flags.contains("UP"))
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
    flags: String,
    mtu: u64,
    addresses: Vec<String>,
}

impl Interface {
    fn into_json(self) -> Value {
        json!({
            "name": self.name,
            "flags": self.flags,
            "mtu": self.mtu,
            "addresses": self.addresses,
        })
    }
}

fn is_interface_line(line: &str) -> bool {
    match line.split_once(':') {
        Some((index, _)) => !index.is_empty() && index.chars().all(|c| c.is_ascii_digit()),
        None => false,
    }
}

/// `N: name: <FLAGS> mtu M ...`
fn parse_interface_line(line: &str) -> Option<Interface> {
    let mut tokens = line.split_whitespace();
    tokens.next()?;
    let name = tokens.next()?.trim_end_matches(':').to_string();
    let flags = tokens
        .next()?
        .strip_prefix('<')?
        .strip_suffix('>')?
        .to_string();
    let rest: Vec<&str> = tokens.collect();
    let mtu = rest
        .windows(2)
        .find(|pair| pair[0] == "mtu")
        .and_then(|pair| pair[1].parse().ok())?;
    Some(Interface {
        name,
        flags,
        mtu,
        addresses: Vec::new(),
    })
}

/// `ps aux` rows; visibility only, always PASS.
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
        if parts.len() < 11 {
            continue;
        }
        processes.push(json!({
            "user": parts[0],
            "pid": parts[1],
            "cpu": parts[2],
            "mem": parts[3],
            "command": parts[10..].join(" "),
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

    fn failed(stderr: &str) -> CommandOutput {
        CommandOutput {
            stdout: String::new(),
            stderr: stderr.to_string(),
            exit_code: 1,
        }
    }

    const DF_OUTPUT: &str = "\
Filesystem      Size  Used Avail Use% Mounted on
/dev/sda1        50G   45G  2.5G  95% /
/dev/sda2       100G   20G   75G  21% /home
tmpfs           7.8G     0  7.8G   0% /dev/shm
";

    #[test]
    fn disk_usage_flags_filesystems_above_ninety_percent() {
        let result = parse_disk_usage(&ok(DF_OUTPUT));

        assert_eq!(result.status, CheckStatus::Fail);
        assert_eq!(result.details["warning_count"], 1);
        assert_eq!(result.details["filesystems"].as_array().map(Vec::len), Some(3));
        assert_eq!(result.details["filesystems"][0]["usage_percent"], 95);
        assert_eq!(result.details["filesystems"][0]["mount_point"], "/");
    }

    #[test]
    fn disk_usage_all_below_threshold_passes() {
        let stdout = "\
Filesystem      Size  Used Avail Use% Mounted on
/dev/sda1        50G   20G   28G  42% /
";
        let result = parse_disk_usage(&ok(stdout));
        assert_eq!(result.status, CheckStatus::Pass);
        assert_eq!(result.details["warning_count"], 0);
    }

    #[test]
    fn disk_usage_short_output_is_invalid() {
        let result = parse_disk_usage(&ok("garbage"));
        assert_eq!(result.status, CheckStatus::Fail);
        assert_eq!(result.message, "Invalid disk usage output");
    }

    #[test]
    fn disk_usage_non_zero_exit_short_circuits() {
        let result = parse_disk_usage(&failed("df: cannot read table"));
        assert_eq!(result.status, CheckStatus::Fail);
        assert!(result.message.contains("df: cannot read table"));
    }

    #[test]
    fn memory_at_ninety_percent_passes() {
        let stdout = "\
              total        used        free      shared  buff/cache   available
Mem:          16000       14400         600         200        1000        1200
Swap:          2048           0        2048
";
        let result = parse_memory(&ok(stdout));
        assert_eq!(result.status, CheckStatus::Pass);
        assert_eq!(result.details["usage_percent"], 90);
    }

    #[test]
    fn memory_above_ninety_percent_warns() {
        let stdout = "\
              total        used        free      shared  buff/cache   available
Mem:          16000       14560         440         200        1000        1040
";
        let result = parse_memory(&ok(stdout));
        assert_eq!(result.status, CheckStatus::Warn);
        assert_eq!(result.details["usage_percent"], 91);
    }

    #[test]
    fn memory_without_mem_line_fails() {
        let result = parse_memory(&ok("Swap: 2048 0 2048"));
        assert_eq!(result.status, CheckStatus::Fail);
        assert_eq!(result.message, "Failed to parse memory information");
    }

    #[test]
    fn cpu_load_exactly_two_per_cpu_passes() {
        let channel = MockChannel::new();
        channel.respond("nproc", "4\n", "", 0);
        let uptime = ok(" 10:24:31 up 5 days,  2:01,  1 user,  load average: 8.00, 6.10, 5.90");

        let result = parse_cpu_load(&channel, &uptime);
        assert_eq!(result.status, CheckStatus::Pass);
        assert_eq!(result.details["cpu_count"], 4);
        assert_eq!(result.details["load_per_cpu"], 2.0);
    }

    #[test]
    fn cpu_load_above_two_per_cpu_warns() {
        let channel = MockChannel::new();
        channel.respond("nproc", "2\n", "", 0);
        let uptime = ok(" 10:24:31 up 5 days,  2:01,  1 user,  load average: 8.00, 6.10, 5.90");

        let result = parse_cpu_load(&channel, &uptime);
        assert_eq!(result.status, CheckStatus::Warn);
        assert_eq!(result.details["load_per_cpu"], 4.0);
    }

    #[test]
    fn cpu_load_defaults_to_one_cpu_when_nproc_fails() {
        let channel = MockChannel::new();
        channel.fail("nproc");
        let uptime = ok("load average: 0.50, 0.40, 0.30");

        let result = parse_cpu_load(&channel, &uptime);
        assert_eq!(result.status, CheckStatus::Pass);
        assert_eq!(result.details["cpu_count"], 1);
    }

    #[test]
    fn cpu_load_unparsable_output_fails() {
        let channel = MockChannel::new();
        let result = parse_cpu_load(&channel, &ok("nothing useful here"));
        assert_eq!(result.status, CheckStatus::Fail);
        assert_eq!(channel.call_count(), 0);
    }

    #[test]
    fn services_with_failed_units_fail() {
        let stdout = "\
  UNIT           LOAD   ACTIVE SUB    DESCRIPTION
nginx.service    loaded failed failed A high performance web server
postfix.service  loaded failed failed Postfix Mail Transport Agent
";
        let result = parse_services(&ok(stdout));
        assert_eq!(result.status, CheckStatus::Fail);
        assert_eq!(result.message, "Found 2 failed service(s)");
        assert_eq!(
            result.details["failed_services"][0]["unit"],
            "nginx.service"
        );
    }

    #[test]
    fn services_without_failures_pass() {
        let stdout = "  UNIT   LOAD   ACTIVE SUB    DESCRIPTION\n0 loaded units listed.\n";
        let result = parse_services(&ok(stdout));
        assert_eq!(result.status, CheckStatus::Pass);
    }

    const IP_ADDR_OUTPUT: &str = "\
1: lo: <LOOPBACK,UP,LOWER_UP> mtu 65536 qdisc noqueue state UNKNOWN
    inet 127.0.0.1/8 scope host lo
2: eth0: <BROADCAST,MULTICAST,UP,LOWER_UP> mtu 1500 qdisc mq state UP
    inet 192.168.1.100/24 brd 192.168.1.255 scope global eth0
";

    #[test]
    fn network_with_up_interface_passes() {
        let result = parse_network(&ok(IP_ADDR_OUTPUT));
        assert_eq!(result.status, CheckStatus::Pass);
        assert_eq!(result.details["up_count"], 2);
        assert_eq!(result.details["interfaces"][1]["name"], "eth0");
        assert_eq!(result.details["interfaces"][1]["mtu"], 1500);
        assert_eq!(
            result.details["interfaces"][1]["addresses"][0],
            "192.168.1.100/24"
        );
    }

    #[test]
    fn network_with_no_up_interface_fails() {
        let stdout = "\
1: eth0: <BROADCAST,MULTICAST> mtu 1500 qdisc mq state DOWN
    inet 192.168.1.100/24 brd 192.168.1.255 scope global eth0
";
        let result = parse_network(&ok(stdout));
        assert_eq!(result.status, CheckStatus::Fail);
        assert_eq!(result.details["up_count"], 0);
    }

    #[test]
    fn processes_always_pass_and_list_rows() {
        let stdout = "\
USER         PID %CPU %MEM    VSZ   RSS TTY      STAT START   TIME COMMAND
root           1  0.0  0.1 169404 13300 ?        Ss   Jul01   0:12 /sbin/init splash
www-data    1234  1.5  2.0 715000 82000 ?        S    Jul02   5:43 nginx: worker process
";
        let result = parse_processes(&ok(stdout));
        assert_eq!(result.status, CheckStatus::Pass);
        assert_eq!(result.message, "Showing top 2 processes");
        assert_eq!(result.details["processes"][0]["command"], "/sbin/init splash");
        assert_eq!(
            result.details["processes"][1]["command"],
            "nginx: worker process"
        );
    }

    #[test]
    fn dispatch_covers_unknown_checks() {
        let channel = MockChannel::new();
        let profile = LinuxProfile;
        let result = profile.parse_result(&channel, "kernel_params", &ok("ok"));
        assert_eq!(result.status, CheckStatus::Pass);
        assert_eq!(result.details["exit_code"], 0);
    }
}
