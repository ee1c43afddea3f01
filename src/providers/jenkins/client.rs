use crate::auth::Token;
use crate::error::Result;
use crate::http::{ApiClient, Auth, RetryPolicy};

use super::types::{JenkinsBuild, JenkinsJob};

/// Fields requested for every build; Jenkins returns everything otherwise.
const BUILD_TREE: &str = "number,url,building,result,timestamp,duration,displayName,description,\
actions[_class,causes[_class,shortDescription,userId],parameters[name,value],\
lastBuiltRevision[SHA1,branch[SHA1,name]],buildsByBranchName[*[*[*]]]]";

/// Jenkins JSON API client.
#[derive(Clone)]
pub struct JenkinsClient {
    api: ApiClient,
}

/// `folder/job` becomes `job/folder/job/job/`.
pub(crate) fn job_path(full_name: &str) -> String {
    full_name
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| format!("job/{segment}/"))
        .collect()
}

impl JenkinsClient {
    pub fn new(
        base_url: &str,
        user: Option<&str>,
        token: Option<Token>,
        retry: RetryPolicy,
    ) -> Result<Self> {
        // API tokens are only accepted over basic auth, paired with their user.
        let auth = match (user, token) {
            (Some(user), Some(token)) => Auth::Basic {
                user: user.to_string(),
                token,
            },
            _ => Auth::None,
        };
        Ok(Self {
            api: ApiClient::new(base_url, auth, retry)?,
        })
    }

    /// Job metadata only, used to check that a job exists.
    pub async fn get_job(&self, full_name: &str) -> Result<JenkinsJob> {
        let mut url = self.api.endpoint(&format!("{}api/json", job_path(full_name)))?;
        url.query_pairs_mut().append_pair("tree", "name,fullName");
        self.api.get_json(url).await
    }

    /// The `depth` most recent builds of a job, newest first.
    pub async fn list_builds(&self, full_name: &str, depth: usize) -> Result<Vec<JenkinsBuild>> {
        let mut url = self.api.endpoint(&format!("{}api/json", job_path(full_name)))?;
        url.query_pairs_mut().append_pair(
            "tree",
            &format!("name,fullName,builds[{BUILD_TREE}]{{0,{}}}", depth.max(1)),
        );
        let job: JenkinsJob = self.api.get_json(url).await?;
        Ok(job.builds)
    }

    pub async fn get_build(&self, full_name: &str, number: &str) -> Result<JenkinsBuild> {
        let mut url = self
            .api
            .endpoint(&format!("{}{number}/api/json", job_path(full_name)))?;
        url.query_pairs_mut().append_pair("tree", BUILD_TREE);
        self.api.get_json(url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_path_nests_folders() {
        assert_eq!(job_path("deploy"), "job/deploy/");
        assert_eq!(job_path("team/deploy"), "job/team/job/deploy/");
        assert_eq!(job_path("/team//deploy/"), "job/team/job/deploy/");
    }
}
