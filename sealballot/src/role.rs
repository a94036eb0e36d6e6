use crate::*;
use uuid::Uuid;

/// Who is acting
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Voter,
    CountingOffice,
    DecryptionEntity,
}

/// Things an actor may be allowed to do
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    SubmitVote,
    ViewVotingStatus,
    ReviewIdentity,
    CountBallot,
    ViewTally,
    VerifyAnyReceipt,
    ManageKeys,
}

impl Role {
    /// The authorization table.
    ///
    /// Matching on the role is exhaustive: adding a role will not compile
    /// until it is given an explicit set of permissions.
    pub fn allows(self, permission: Permission) -> bool {
        use Permission::*;
        match self {
            Role::Admin => matches!(permission, ViewTally | VerifyAnyReceipt | ManageKeys),
            Role::Voter => matches!(permission, SubmitVote | ViewVotingStatus),
            Role::CountingOffice => matches!(permission, ReviewIdentity),
            Role::DecryptionEntity => matches!(permission, CountBallot | ViewTally),
        }
    }

    /// The key-holding authority this role acts as, if any
    pub fn authority(self) -> Option<Authority> {
        match self {
            Role::CountingOffice => Some(Authority::CountingOffice),
            Role::DecryptionEntity => Some(Authority::DecryptionEntity),
            Role::Admin | Role::Voter => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let name = match self {
            Role::Admin => "admin",
            Role::Voter => "voter",
            Role::CountingOffice => "co",
            Role::DecryptionEntity => "de",
        };
        write!(f, "{}", name)
    }
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let name = match self {
            Permission::SubmitVote => "submit votes",
            Permission::ViewVotingStatus => "view voting status",
            Permission::ReviewIdentity => "review voter identity",
            Permission::CountBallot => "count ballots",
            Permission::ViewTally => "view the tally",
            Permission::VerifyAnyReceipt => "verify other voters' receipts",
            Permission::ManageKeys => "manage election keys",
        };
        write!(f, "{}", name)
    }
}

/// An authenticated caller, as established by the (external) auth layer
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub id: Uuid,
    pub role: Role,
}

impl Actor {
    pub fn new(id: Uuid, role: Role) -> Self {
        Actor { id, role }
    }

    pub fn require(&self, permission: Permission) -> Result<()> {
        if self.role.allows(permission) {
            Ok(())
        } else {
            Err(Error::Unauthorized {
                role: self.role,
                permission,
            })
        }
    }
}
