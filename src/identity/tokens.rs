//! Wire types of the identity v3 API. These are NOT complete definitions of the responses,
//! only the parts the negotiator needs.
use super::Authenticated;
use crate::client::ServiceCatalog;

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub(crate) struct TokenResponse {
    pub token: TokenBody,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub(crate) struct TokenBody {
    #[serde(default)]
    pub catalog: ServiceCatalog,
    pub project: Option<ProjectRef>,
    pub domain: Option<DomainRef>,
    pub user: Option<UserRef>,
    #[serde(default)]
    pub expires_at: String,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub(crate) struct ProjectRef {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub domain: Option<DomainRef>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub(crate) struct DomainRef {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub(crate) struct UserRef {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub domain: Option<DomainRef>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub(crate) struct CatalogResponse {
    pub catalog: ServiceCatalog,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub(crate) struct ProjectsResponse {
    #[serde(default)]
    pub projects: Vec<ProjectEntry>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub(crate) struct ProjectEntry {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub domain_id: String,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub(crate) struct DomainsResponse {
    #[serde(default)]
    pub domains: Vec<DomainRef>,
}

impl TokenBody {
    pub fn into_authenticated(self, token: String) -> Authenticated {
        let user_domain = self
            .user
            .as_ref()
            .and_then(|user| user.domain.clone());
        let project_domain = self
            .project
            .as_ref()
            .and_then(|project| project.domain.clone());
        // a domain scoped token names its domain directly
        let domain = self.domain.or(project_domain).or(user_domain);
        let (project_id, project_name) = self
            .project
            .map(|project| (project.id, project.name))
            .unwrap_or_default();
        let (domain_id, domain_name) = domain
            .map(|domain| (domain.id, domain.name))
            .unwrap_or_default();
        Authenticated {
            token,
            catalog: self.catalog,
            project_id,
            project_name,
            domain_id,
            domain_name,
            user_id: self.user.map(|user| user.id).unwrap_or_default(),
            expires_at: self.expires_at,
        }
    }
}
