//! Image reference parsing shared by the ingest pipeline (C4) and the
//! registry probe (C1).
//!
//! Rules (spec §4.4 step 1): if the portion before the last `/` contains
//! `.` or `:`, it is the registry; otherwise the registry defaults to
//! `docker.io`. If the last `:` occurs after the last `/`, the suffix is
//! the tag; otherwise the tag defaults to `latest`.

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageRef {
    pub registry: String,
    pub repository: String,
    pub tag: String,
}

impl ImageRef {
    pub fn parse(image: &str) -> Self {
        let image = image.trim();
        let last_slash = image.rfind('/');

        let tag_colon = image.rfind(':').filter(|&ci| match last_slash {
            Some(si) => ci > si,
            None => true,
        });

        let (without_tag, tag) = match tag_colon {
            Some(ci) => (&image[..ci], image[ci + 1..].to_string()),
            None => (image, "latest".to_string()),
        };

        let last_slash_wt = without_tag.rfind('/');
        let (registry, repository) = match last_slash_wt {
            Some(si) => {
                let candidate = &without_tag[..si];
                if candidate.contains('.') || candidate.contains(':') {
                    (candidate.to_string(), without_tag[si + 1..].to_string())
                } else {
                    ("docker.io".to_string(), without_tag.to_string())
                }
            }
            None => ("docker.io".to_string(), without_tag.to_string()),
        };

        Self {
            registry,
            repository,
            tag,
        }
    }

    pub fn canonical(&self) -> String {
        format!("{}/{}:{}", self.registry, self.repository, self.tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_registry_and_tag() {
        let r = ImageRef::parse("nginx");
        assert_eq!(r.registry, "docker.io");
        assert_eq!(r.repository, "nginx");
        assert_eq!(r.tag, "latest");
    }

    #[test]
    fn defaults_registry_keeps_tag() {
        let r = ImageRef::parse("nginx:latest");
        assert_eq!(r.registry, "docker.io");
        assert_eq!(r.repository, "nginx");
        assert_eq!(r.tag, "latest");
    }

    #[test]
    fn namespaced_docker_hub_repo_has_no_explicit_registry() {
        let r = ImageRef::parse("library/nginx:1.27");
        assert_eq!(r.registry, "docker.io");
        assert_eq!(r.repository, "library/nginx");
        assert_eq!(r.tag, "1.27");
    }

    #[test]
    fn explicit_registry_with_dot() {
        let r = ImageRef::parse("registry.example.com/team/app:v1");
        assert_eq!(r.registry, "registry.example.com");
        assert_eq!(r.repository, "team/app");
        assert_eq!(r.tag, "v1");
    }

    #[test]
    fn explicit_registry_with_port() {
        let r = ImageRef::parse("localhost:5000/app:v1");
        assert_eq!(r.registry, "localhost:5000");
        assert_eq!(r.repository, "app");
        assert_eq!(r.tag, "v1");
    }

    #[test]
    fn registry_with_port_and_no_tag() {
        let r = ImageRef::parse("localhost:5000/app");
        assert_eq!(r.registry, "localhost:5000");
        assert_eq!(r.repository, "app");
        assert_eq!(r.tag, "latest");
    }

    #[test]
    fn deep_repository_path() {
        let r = ImageRef::parse("quay.io/org/team/app:v2");
        assert_eq!(r.registry, "quay.io");
        assert_eq!(r.repository, "org/team/app");
        assert_eq!(r.tag, "v2");
    }
}
