//! Function registry.
//!
//! Every packet names the function it invokes. [`FunctionSpec`] is the
//! closed catalog of functions this engine knows, each tagged with its wire
//! name and [`Category`].

use crate::error::FunctionError;
use serde::Serialize;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

/// Prefix of end-user command functions.
pub const USER_PREFIX: &str = "user-";

/// Optional prefix accepted on protocol-control functions.
pub const PROTOCOL_PREFIX: &str = "protocol-";

/// Handling category of a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    /// Connection-level control messages.
    Protocol,
    /// Commands issued by the end user.
    User,
    /// Requests the server makes of the client.
    ClientCallback,
    /// Replies the client makes back to the server.
    ServerCallback,
}

impl Category {
    pub fn name(&self) -> &'static str {
        match self {
            Category::Protocol => "protocol",
            Category::User => "user",
            Category::ClientCallback => "client-callback",
            Category::ServerCallback => "server-callback",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

macro_rules! functions {
    ($($variant:ident => $wire:literal, $category:ident;)*) => {
        /// A known protocol function.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
        pub enum FunctionSpec {
            $($variant,)*
        }

        impl FunctionSpec {
            /// Every function in catalog order.
            pub const ALL: &'static [FunctionSpec] = &[$(FunctionSpec::$variant,)*];

            /// Canonical wire name.
            pub fn encode(&self) -> &'static str {
                match self {
                    $(FunctionSpec::$variant => $wire,)*
                }
            }

            pub fn category(&self) -> Category {
                match self {
                    $(FunctionSpec::$variant => Category::$category,)*
                }
            }
        }
    };
}

functions! {
    ProtocolProtocol => "protocol", Protocol;
    ProtocolFlush1 => "flush1", Protocol;
    ProtocolFlush2 => "flush2", Protocol;
    ProtocolRelease => "release", Protocol;
    ProtocolRelease2 => "release2", Protocol;
    ProtocolCrypto => "crypto", Protocol;
    ProtocolCompress1 => "compress1", Protocol;
    ProtocolCompress2 => "compress2", Protocol;
    ProtocolEcho => "echo", Protocol;
    ProtocolErrorHandler => "errorHandler", Protocol;
    ProtocolFuncHandler => "funcHandler", Protocol;

    UserSpecified => "user-specified", User;
    UserDepots => "user-depots", User;
    UserInfo => "user-info", User;
    UserFiles => "user-files", User;
    UserClients => "user-clients", User;
    UserJobs => "user-jobs", User;
    UserChanges => "user-changes", User;
    UserLogin => "user-login", User;
    UserLogout => "user-logout", User;
    UserClient => "user-client", User;
    UserFstat => "user-fstat", User;
    UserSync => "user-sync", User;
    UserChange => "user-change", User;
    UserDescribe => "user-describe", User;
    UserOpened => "user-opened", User;
    UserEdit => "user-edit", User;
    UserAdd => "user-add", User;
    UserDelete => "user-delete", User;
    UserRevert => "user-revert", User;
    UserSubmit => "user-submit", User;
    UserFilelog => "user-filelog", User;
    UserPrint => "user-print", User;
    UserWhere => "user-where", User;
    UserHave => "user-have", User;
    UserReopen => "user-reopen", User;
    UserDirs => "user-dirs", User;
    UserInteg => "user-integ", User;
    UserResolve => "user-resolve", User;
    UserResolved => "user-resolved", User;
    UserFixes => "user-fixes", User;
    UserJobspec => "user-jobspec", User;
    UserFix => "user-fix", User;
    UserJob => "user-job", User;
    UserLock => "user-lock", User;
    UserUnlock => "user-unlock", User;
    UserDiff => "user-diff", User;
    UserCounters => "user-counters", User;
    UserUsers => "user-users", User;
    UserMove => "user-move", User;
    UserLabels => "user-labels", User;
    UserLabel => "user-label", User;
    UserLabelsync => "user-labelsync", User;
    UserTag => "user-tag", User;
    UserMonitor => "user-monitor", User;
    UserGroup => "user-group", User;
    UserGroups => "user-groups", User;
    UserBranch => "user-branch", User;
    UserBranches => "user-branches", User;
    UserCounter => "user-counter", User;
    UserIntegrated => "user-integrated", User;
    UserAnnotate => "user-annotate", User;
    UserDbschema => "user-dbschema", User;
    UserExport => "user-export", User;
    UserShelve => "user-shelve", User;
    UserUnshelve => "user-unshelve", User;
    UserProtects => "user-protects", User;
    UserProtect => "user-protect", User;
    UserUser => "user-user", User;
    UserReviews => "user-reviews", User;
    UserReview => "user-review", User;
    UserDiff2 => "user-diff2", User;
    UserInterchanges => "user-interchanges", User;
    UserGrep => "user-grep", User;
    UserDepot => "user-depot", User;
    UserAttribute => "user-attribute", User;
    UserSpec => "user-spec", User;
    UserCopy => "user-copy", User;
    UserConfigure => "user-configure", User;
    UserPasswd => "user-passwd", User;
    UserDiskspace => "user-diskspace", User;
    UserObliterate => "user-obliterate", User;
    UserStreams => "user-streams", User;
    UserStream => "user-stream", User;
    UserIstat => "user-istat", User;
    UserMerge => "user-merge", User;
    UserLogtail => "user-logtail", User;
    UserTrust => "user-trust", User;
    UserReconcile => "user-reconcile", User;
    UserDuplicate => "user-duplicate", User;
    UserUnload => "user-unload", User;
    UserReload => "user-reload", User;
    UserPopulate => "user-populate", User;
    UserKey => "user-key", User;
    UserKeys => "user-keys", User;
    UserSearch => "user-search", User;
    UserProperty => "user-property", User;
    UserSizes => "user-sizes", User;
    UserJournalwait => "user-journalwait", User;
    UserTriggers => "user-triggers", User;
    UserVerify => "user-verify", User;
    UserRenameuser => "user-renameuser", User;
    UserGraph => "user-graph", User;
    UserRepos => "user-repos", User;
    UserTransmit => "user-transmit", User;
    UserList => "user-list", User;
    UserRetype => "user-retype", User;

    ClientMessage => "client-Message", ClientCallback;
    ClientFstatInfo => "client-FstatInfo", ClientCallback;
    ClientPrompt => "client-Prompt", ClientCallback;
    ClientSetPassword => "client-SetPassword", ClientCallback;
    ClientCrypto => "client-Crypto", ClientCallback;
    ClientAck => "client-Ack", ClientCallback;
    ClientChmodFile => "client-ChmodFile", ClientCallback;
    ClientOpenFile => "client-OpenFile", ClientCallback;
    ClientWriteFile => "client-WriteFile", ClientCallback;
    ClientCloseFile => "client-CloseFile", ClientCallback;
    ClientCheckFile => "client-CheckFile", ClientCallback;
    ClientInputData => "client-InputData", ClientCallback;
    ClientSendFile => "client-SendFile", ClientCallback;
    ClientDeleteFile => "client-DeleteFile", ClientCallback;
    ClientOutputBinary => "client-OutputBinary", ClientCallback;
    ClientOutputError => "client-OutputError", ClientCallback;
    ClientOutputText => "client-OutputText", ClientCallback;
    ClientOutputData => "client-OutputData", ClientCallback;
    ClientOutputInfo => "client-OutputInfo", ClientCallback;
    ClientMoveFile => "client-MoveFile", ClientCallback;
    ClientOpenMerge3 => "client-OpenMerge3", ClientCallback;
    ClientWriteMerge => "client-WriteMerge", ClientCallback;
    ClientCloseMerge => "client-CloseMerge", ClientCallback;
    ClientSso => "client-SSO", ClientCallback;
    ClientOpenMerge2 => "client-OpenMerge2", ClientCallback;
    ClientReconcileEdit => "client-ReconcileEdit", ClientCallback;
    ClientReconcileAdd => "client-ReconcileAdd", ClientCallback;
    ClientReconcileFlush => "client-ReconcileFlush", ClientCallback;
    ClientProgress => "client-Progress", ClientCallback;
    ClientReceiveFiles => "client-ReceiveFiles", ClientCallback;
    ClientDmPrompt => "dm-Prompt", ClientCallback;
    ClientDmOpenFile => "dm-OpenFile", ClientCallback;
    ClientDmMoveFile => "dm-MoveFile", ClientCallback;

    ServerDmLogin => "dm-Login", ServerCallback;
    ServerDmPasswd => "dm-Passwd", ServerCallback;
    ServerDmSubmitChange => "dm-SubmitChange", ServerCallback;
    ServerLbrOpen => "lbr-Open", ServerCallback;
    ServerDmLbrOpen => "dm-LbrOpen", ServerCallback;
    ServerLbrWriteFile => "lbr-WriteFile", ServerCallback;
    ServerDmSubmitFile => "dm-SubmitFile", ServerCallback;
    ServerDmCommitSubmit => "dm-CommitSubmit", ServerCallback;
    ServerReleaseFile => "server-ReleaseFile", ServerCallback;
    ServerCmpFile => "server-CmpFile", ServerCallback;
    ServerDmResolvedFile => "dm-ResolvedFile", ServerCallback;
    ServerDmResolvedFailed => "dm-ResolvedFailed", ServerCallback;
    ServerReconcileFile => "server-ReconcileFile", ServerCallback;
    ServerReconcileAdds => "server-ReconcileAdds", ServerCallback;
}

fn wire_table() -> &'static HashMap<&'static str, FunctionSpec> {
    static TABLE: OnceLock<HashMap<&'static str, FunctionSpec>> = OnceLock::new();
    TABLE.get_or_init(|| FunctionSpec::ALL.iter().map(|f| (f.encode(), *f)).collect())
}

impl FunctionSpec {
    /// Decodes a wire name.
    ///
    /// Protocol functions may carry a `protocol-` prefix; a prefixed name
    /// that is not a protocol function is always an error. With `relaxed`
    /// set, an unknown `user-` name yields [`FunctionSpec::UserSpecified`].
    /// No other category is ever relaxed.
    pub fn decode(wire: &str, relaxed: bool) -> Result<Self, FunctionError> {
        if let Some(spec) = wire_table().get(wire) {
            return Ok(*spec);
        }

        if let Some(name) = wire.strip_prefix(PROTOCOL_PREFIX) {
            return match wire_table().get(name) {
                Some(spec) if spec.category() == Category::Protocol => Ok(*spec),
                _ => Err(FunctionError::UnknownProtocol(wire.to_owned())),
            };
        }

        if relaxed && wire.starts_with(USER_PREFIX) {
            return Ok(FunctionSpec::UserSpecified);
        }

        Err(FunctionError::Unknown(wire.to_owned()))
    }

    /// Resolves an end-user command name such as `info` or `sync`.
    pub fn from_user_command(name: &str, relaxed: bool) -> Result<Self, FunctionError> {
        Self::decode(&format!("{USER_PREFIX}{name}"), relaxed)
    }

    /// Wire name to send for `command`; only differs from [`encode`]
    /// for the relaxed sentinel.
    ///
    /// [`encode`]: Self::encode
    pub fn wire_name<'a>(&self, command: &'a str) -> Cow<'a, str> {
        match self {
            FunctionSpec::UserSpecified => Cow::Owned(format!("{USER_PREFIX}{command}")),
            _ => Cow::Borrowed(self.encode()),
        }
    }

    /// Only user commands may be decoded relaxed.
    pub fn is_relaxable(&self) -> bool {
        self.category() == Category::User
    }

    pub fn is_protocol(&self) -> bool {
        self.category() == Category::Protocol
    }
}

impl fmt::Display for FunctionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.encode())
    }
}

/// Free-function form of [`FunctionSpec::category`].
pub fn category_of(spec: FunctionSpec) -> Category {
    spec.category()
}
