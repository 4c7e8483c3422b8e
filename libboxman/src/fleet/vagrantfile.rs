//! Rendering of the generated VM-definition file.
//!
//! The template has exactly two substitution points: `{array}` (the quoted,
//! comma-joined host names) and `{image}` (the base box identifier).

/// Template used when the caller does not supply one. The body contains
/// Ruby's own `"#{...}"` interpolation, so the raw string needs double
/// hashes.
pub const DEFAULT_TEMPLATE: &str = r##"
Vagrant.configure("2") do |config|
  ([{array}]).each do |name|
    config.vm.define "#{name}" do |node|
      node.vm.box = "{image}"
    end
  end
end
"##;

/// Render a Vagrantfile body for the given hosts and base image.
pub fn render(hosts: &[String], image: &str, template: Option<&str>) -> String {
    let array = hosts
        .iter()
        .map(|host| format!("'{}'", host))
        .collect::<Vec<_>>()
        .join(",");
    template
        .unwrap_or(DEFAULT_TEMPLATE)
        .replace("{array}", &array)
        .replace("{image}", image)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hosts(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_render_substitutes_both_points() {
        let body = render(&hosts(&["node1", "node2"]), "ubuntu/xenial64", None);
        assert!(body.contains("(['node1','node2']).each do |name|"));
        assert!(body.contains("node.vm.box = \"ubuntu/xenial64\""));
        // Ruby's own interpolation must survive untouched.
        assert!(body.contains("config.vm.define \"#{name}\""));
    }

    #[test]
    fn test_render_accepts_a_caller_template() {
        let body = render(&hosts(&["a"]), "img", Some("hosts=[{array}] box={image}"));
        assert_eq!(body, "hosts=['a'] box=img");
    }

    #[test]
    fn test_render_is_deterministic() {
        let names = hosts(&["n1", "n2", "n3"]);
        assert_eq!(render(&names, "img", None), render(&names, "img", None));
    }
}
