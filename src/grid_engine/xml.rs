//! `qstat`/`qhost` XML response shapes
//!
//! `quick-xml`'s serde support maps attributes via `@name` and element text
//! via `$text`, which is enough to describe the irregular bits of this XML
//! (`hard_request name="..."` with a text value, `queuevalue name="..."`
//! likewise) without hand-rolled event parsing.
use serde::Deserialize;

#[derive(Deserialize, Debug, Default)]
pub struct QstatRoot {
    #[serde(default)]
    pub queue_info: QueueInfo,
    #[serde(default)]
    pub job_info: JobInfo,
}

#[derive(Deserialize, Debug, Default)]
pub struct QueueInfo {
    #[serde(rename = "Queue-List", default)]
    pub queue_list: Vec<QueueList>,
}

#[derive(Deserialize, Debug, Default)]
pub struct QueueList {
    pub name: String,
    #[serde(rename = "job_list", default)]
    pub job_list: Vec<JobListEntry>,
}

#[derive(Deserialize, Debug, Default)]
pub struct JobInfo {
    #[serde(rename = "job_list", default)]
    pub job_list: Vec<JobListEntry>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct JobListEntry {
    #[serde(rename = "JB_job_number")]
    pub jb_job_number: String,
    #[serde(rename = "JB_name", default)]
    pub jb_name: String,
    #[serde(rename = "JB_owner", default)]
    pub jb_owner: String,
    pub state: String,
    #[serde(rename = "JAT_start_time", default)]
    pub jat_start_time: Option<String>,
    #[serde(rename = "JB_submission_time", default)]
    pub jb_submission_time: Option<String>,
    #[serde(default)]
    pub tasks: Option<String>,
    #[serde(default)]
    pub hard_req_queue: Option<String>,
    #[serde(default)]
    pub requested_pe: Option<RequestedPe>,
    #[serde(rename = "hard_request", default)]
    pub hard_request: Vec<HardRequest>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct RequestedPe {
    #[serde(rename = "@name")]
    pub name: String,
    #[serde(rename = "$text", default)]
    pub text: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct HardRequest {
    #[serde(rename = "@name")]
    pub name: String,
    #[serde(rename = "$text", default)]
    pub text: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
pub struct QhostRoot {
    #[serde(rename = "host", default)]
    pub hosts: Vec<Host>,
}

#[derive(Deserialize, Debug, Default)]
pub struct Host {
    #[serde(rename = "@name")]
    pub name: String,
    #[serde(rename = "queue", default)]
    pub queues: Vec<HostQueue>,
}

#[derive(Deserialize, Debug, Default)]
pub struct HostQueue {
    #[serde(rename = "@name")]
    pub name: String,
    #[serde(rename = "queuevalue", default)]
    pub values: Vec<QueueValue>,
}

#[derive(Deserialize, Debug, Default)]
pub struct QueueValue {
    #[serde(rename = "@name")]
    pub name: String,
    #[serde(rename = "$text", default)]
    pub text: Option<String>,
}

impl HostQueue {
    pub fn value(&self, name: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|value| value.name == name)
            .and_then(|value| value.text.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_minimal_qstat_document() {
        let xml = r#"
        <job_info>
          <queue_info>
            <Queue-List>
              <name>main.q@worker-1</name>
              <job_list>
                <JB_job_number>10</JB_job_number>
                <JB_name>job</JB_name>
                <JB_owner>alice</JB_owner>
                <state>r</state>
                <JAT_start_time>2024-01-01T00:00:00</JAT_start_time>
                <hard_request name="gpus">1</hard_request>
              </job_list>
            </Queue-List>
          </queue_info>
          <job_info>
            <job_list>
              <JB_job_number>11</JB_job_number>
              <JB_name>pending</JB_name>
              <JB_owner>bob</JB_owner>
              <state>qw</state>
              <JB_submission_time>2024-01-01T00:00:00</JB_submission_time>
            </job_list>
          </job_info>
        </job_info>
        "#;
        let parsed: QstatRoot = quick_xml::de::from_str(xml).unwrap();
        assert_eq!(parsed.queue_info.queue_list.len(), 1);
        assert_eq!(parsed.job_info.job_list.len(), 1);
        let running = &parsed.queue_info.queue_list[0].job_list[0];
        assert_eq!(running.jb_owner, "alice");
        assert_eq!(running.hard_request[0].name, "gpus");
        assert_eq!(running.hard_request[0].text.as_deref(), Some("1"));
    }

    #[test]
    fn parses_a_qhost_document() {
        let xml = r#"
        <qhost>
          <host name="worker-1">
            <queue name="main.q">
              <queuevalue name="state_string"></queuevalue>
              <queuevalue name="slots">8</queuevalue>
              <queuevalue name="slots_used">2</queuevalue>
              <queuevalue name="slots_resv">0</queuevalue>
            </queue>
          </host>
        </qhost>
        "#;
        let parsed: QhostRoot = quick_xml::de::from_str(xml).unwrap();
        assert_eq!(parsed.hosts.len(), 1);
        let queue = &parsed.hosts[0].queues[0];
        assert_eq!(queue.value("slots"), Some("8"));
    }
}
